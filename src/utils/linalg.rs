//! Dense symmetric linear-algebra kernels.
//!
//! The regularized normal equations solved by this crate are small (tens of
//! coefficients), symmetric, and usually positive definite. This module
//! provides the two factorizations the solver chains together: a Cholesky
//! decomposition for the well-conditioned case and a cyclic-Jacobi
//! eigen-decomposition used to build a spectral pseudo-inverse when the
//! Cholesky pivot check fails.

use crate::error::{PriftError, Result};
use ndarray::{Array1, Array2};

/// Maximum number of Jacobi sweeps before giving up.
const MAX_JACOBI_SWEEPS: usize = 64;

/// Compute the lower-triangular Cholesky factor L of a symmetric matrix,
/// such that `a = L * L^T`.
///
/// # Arguments
///
/// * `a` - Symmetric square matrix
///
/// # Returns
///
/// * `Some(L)` if the matrix is numerically positive definite, `None` if a
///   pivot is non-positive or non-finite
pub fn cholesky_factor(a: &Array2<f64>) -> Option<Array2<f64>> {
    let n = a.nrows();
    debug_assert_eq!(n, a.ncols());

    let mut l = Array2::zeros((n, n));
    for j in 0..n {
        let mut d = a[[j, j]];
        for k in 0..j {
            d -= l[[j, k]] * l[[j, k]];
        }
        if d <= 0.0 || !d.is_finite() {
            return None;
        }
        let dj = d.sqrt();
        l[[j, j]] = dj;
        for i in (j + 1)..n {
            let mut s = a[[i, j]];
            for k in 0..j {
                s -= l[[i, k]] * l[[j, k]];
            }
            l[[i, j]] = s / dj;
        }
    }
    Some(l)
}

/// Solve `a x = b` given the lower Cholesky factor of `a`.
///
/// Forward substitution with L followed by back substitution with L^T.
pub fn cholesky_solve(l: &Array2<f64>, b: &Array1<f64>) -> Array1<f64> {
    let n = l.nrows();
    debug_assert_eq!(n, b.len());

    let mut y = Array1::zeros(n);
    for i in 0..n {
        let mut s = b[i];
        for k in 0..i {
            s -= l[[i, k]] * y[k];
        }
        y[i] = s / l[[i, i]];
    }

    let mut x = Array1::zeros(n);
    for i in (0..n).rev() {
        let mut s = y[i];
        for k in (i + 1)..n {
            s -= l[[k, i]] * x[k];
        }
        x[i] = s / l[[i, i]];
    }
    x
}

/// Invert a symmetric positive-definite matrix given its lower Cholesky
/// factor, by solving against the columns of the identity.
pub fn cholesky_inverse(l: &Array2<f64>) -> Array2<f64> {
    let n = l.nrows();
    let mut inv = Array2::zeros((n, n));
    let mut e = Array1::zeros(n);
    for j in 0..n {
        e.fill(0.0);
        e[j] = 1.0;
        let col = cholesky_solve(l, &e);
        for i in 0..n {
            inv[[i, j]] = col[i];
        }
    }
    symmetrize(&mut inv);
    inv
}

/// Average a matrix with its transpose in place.
///
/// Substitution round-off leaves the computed inverse very slightly
/// asymmetric; downstream covariance handling assumes exact symmetry.
pub fn symmetrize(m: &mut Array2<f64>) {
    let n = m.nrows();
    for i in 0..n {
        for j in (i + 1)..n {
            let v = 0.5 * (m[[i, j]] + m[[j, i]]);
            m[[i, j]] = v;
            m[[j, i]] = v;
        }
    }
}

/// Eigen-decomposition of a symmetric matrix by cyclic Jacobi rotations.
///
/// # Arguments
///
/// * `a` - Symmetric square matrix
///
/// # Returns
///
/// * `(eigenvalues, eigenvectors)` with eigenvectors in the columns, so that
///   `a = V * diag(eigenvalues) * V^T`
///
/// # Errors
///
/// * `PriftError::DimensionMismatch` if the matrix is not square
/// * `PriftError::ConvergenceFailure` if the off-diagonal mass has not
///   vanished after the sweep limit
pub fn jacobi_eigh(a: &Array2<f64>) -> Result<(Array1<f64>, Array2<f64>)> {
    let n = a.nrows();
    if n != a.ncols() {
        return Err(PriftError::DimensionMismatch(format!(
            "expected square matrix, got {}x{}",
            n,
            a.ncols()
        )));
    }

    let mut m = a.clone();
    let mut v = Array2::eye(n);
    if n <= 1 {
        return Ok((m.diag().to_owned(), v));
    }

    let scale = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    if scale == 0.0 {
        return Ok((Array1::zeros(n), v));
    }
    let tol = f64::EPSILON * scale;

    for _ in 0..MAX_JACOBI_SWEEPS {
        let mut off = 0.0;
        for i in 0..n {
            for j in (i + 1)..n {
                off += m[[i, j]] * m[[i, j]];
            }
        }
        if (2.0 * off).sqrt() <= tol {
            return Ok((m.diag().to_owned(), v));
        }

        for p in 0..(n - 1) {
            for q in (p + 1)..n {
                let apq = m[[p, q]];
                if apq.abs() <= tol * 1e-3 {
                    continue;
                }
                let theta = (m[[q, q]] - m[[p, p]]) / (2.0 * apq);
                let t = if theta >= 0.0 {
                    1.0 / (theta + (1.0 + theta * theta).sqrt())
                } else {
                    1.0 / (theta - (1.0 + theta * theta).sqrt())
                };
                let c = 1.0 / (1.0 + t * t).sqrt();
                let s = t * c;

                // Apply the full similarity transform J^T * M * J:
                // columns first, then rows.
                for k in 0..n {
                    let mkp = m[[k, p]];
                    let mkq = m[[k, q]];
                    m[[k, p]] = c * mkp - s * mkq;
                    m[[k, q]] = s * mkp + c * mkq;
                }
                for k in 0..n {
                    let mpk = m[[p, k]];
                    let mqk = m[[q, k]];
                    m[[p, k]] = c * mpk - s * mqk;
                    m[[q, k]] = s * mpk + c * mqk;
                }
                for k in 0..n {
                    let vkp = v[[k, p]];
                    let vkq = v[[k, q]];
                    v[[k, p]] = c * vkp - s * vkq;
                    v[[k, q]] = s * vkp + c * vkq;
                }
            }
        }
    }

    Err(PriftError::ConvergenceFailure(format!(
        "Jacobi eigen-decomposition did not converge in {} sweeps",
        MAX_JACOBI_SWEEPS
    )))
}

/// Build a spectral pseudo-inverse from an eigen-decomposition, dropping
/// eigenvalues below `rcond` times the largest magnitude.
///
/// # Returns
///
/// * `Some((pinv, kept))` with the number of retained eigenvalues, or
///   `None` when every eigenvalue falls below the cutoff (rank zero)
pub fn pinv_from_eigh(
    evals: &Array1<f64>,
    evecs: &Array2<f64>,
    rcond: f64,
) -> Option<(Array2<f64>, usize)> {
    let n = evals.len();
    let max_abs = evals.iter().fold(0.0f64, |acc, &e| acc.max(e.abs()));
    if max_abs <= 0.0 {
        return None;
    }
    let cutoff = rcond * max_abs;

    let mut inv = Array2::zeros((n, n));
    let mut kept = 0;
    for k in 0..n {
        let e = evals[k];
        if e.abs() <= cutoff {
            continue;
        }
        kept += 1;
        let w = 1.0 / e;
        for i in 0..n {
            for j in 0..n {
                inv[[i, j]] += w * evecs[[i, k]] * evecs[[j, k]];
            }
        }
    }
    if kept == 0 {
        return None;
    }
    Some((inv, kept))
}

/// Ratio of the largest retained eigenvalue magnitude to the smallest.
pub fn spectral_condition(evals: &Array1<f64>, rcond: f64) -> f64 {
    let max_abs = evals.iter().fold(0.0f64, |acc, &e| acc.max(e.abs()));
    if max_abs <= 0.0 {
        return f64::INFINITY;
    }
    let cutoff = rcond * max_abs;
    let min_kept = evals
        .iter()
        .map(|e| e.abs())
        .filter(|&e| e > cutoff)
        .fold(f64::INFINITY, f64::min);
    max_abs / min_kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_cholesky_solve_spd() {
        let a = array![[4.0, 2.0, 0.0], [2.0, 5.0, 1.0], [0.0, 1.0, 3.0]];
        let b = array![2.0, 1.0, 4.0];

        let l = cholesky_factor(&a).expect("matrix is positive definite");
        let x = cholesky_solve(&l, &b);

        // Check a * x == b
        let ax = a.dot(&x);
        for i in 0..3 {
            assert_relative_eq!(ax[i], b[i], epsilon = 1e-12);
        }
    }

    #[test]
    fn test_cholesky_rejects_indefinite() {
        let a = array![[1.0, 2.0], [2.0, 1.0]];
        assert!(cholesky_factor(&a).is_none());
    }

    #[test]
    fn test_cholesky_inverse() {
        let a = array![[4.0, 2.0], [2.0, 5.0]];
        let l = cholesky_factor(&a).unwrap();
        let inv = cholesky_inverse(&l);

        let prod = a.dot(&inv);
        for i in 0..2 {
            for j in 0..2 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_relative_eq!(prod[[i, j]], expected, epsilon = 1e-12);
            }
        }
        assert_relative_eq!(inv[[0, 1]], inv[[1, 0]]);
    }

    #[test]
    fn test_jacobi_known_eigenvalues() {
        // [[2, 1], [1, 2]] has eigenvalues 1 and 3
        let a = array![[2.0, 1.0], [1.0, 2.0]];
        let (evals, evecs) = jacobi_eigh(&a).unwrap();

        let mut sorted: Vec<f64> = evals.iter().cloned().collect();
        sorted.sort_by(|x, y| x.partial_cmp(y).unwrap());
        assert_relative_eq!(sorted[0], 1.0, epsilon = 1e-10);
        assert_relative_eq!(sorted[1], 3.0, epsilon = 1e-10);

        // Reconstruct a = V * diag * V^T
        let mut recon: Array2<f64> = Array2::zeros((2, 2));
        for k in 0..2 {
            for i in 0..2 {
                for j in 0..2 {
                    recon[[i, j]] += evals[k] * evecs[[i, k]] * evecs[[j, k]];
                }
            }
        }
        for i in 0..2 {
            for j in 0..2 {
                assert_relative_eq!(recon[[i, j]], a[[i, j]], epsilon = 1e-10);
            }
        }
    }

    #[test]
    fn test_jacobi_diagonal_matrix() {
        let a = array![[3.0, 0.0], [0.0, 7.0]];
        let (evals, _) = jacobi_eigh(&a).unwrap();
        let mut sorted: Vec<f64> = evals.iter().cloned().collect();
        sorted.sort_by(|x, y| x.partial_cmp(y).unwrap());
        assert_relative_eq!(sorted[0], 3.0);
        assert_relative_eq!(sorted[1], 7.0);
    }

    #[test]
    fn test_pinv_rank_deficient() {
        let a = array![[1.0, 0.0], [0.0, 0.0]];
        let (evals, evecs) = jacobi_eigh(&a).unwrap();
        let (pinv, kept) = pinv_from_eigh(&evals, &evecs, 1e-12).unwrap();

        assert_eq!(kept, 1);
        assert_relative_eq!(pinv[[0, 0]], 1.0, epsilon = 1e-12);
        assert_relative_eq!(pinv[[1, 1]], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_pinv_zero_matrix_is_rank_zero() {
        let a: Array2<f64> = Array2::zeros((3, 3));
        let (evals, evecs) = jacobi_eigh(&a).unwrap();
        assert!(pinv_from_eigh(&evals, &evecs, 1e-12).is_none());
    }

    #[test]
    fn test_spectral_condition() {
        let evals = array![4.0, 2.0, 1e-20];
        let cond = spectral_condition(&evals, 1e-12);
        assert_relative_eq!(cond, 2.0);
    }
}

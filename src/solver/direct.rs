//! Direct solution of the regularized normal equations.
//!
//! Solves `(M + alpha R) x = v` for the expansion coefficients, where
//! `M = A_w^T A_w` and `v = A_w^T b_w` come from the weighted design and
//! R is the smoothness penalty. The coefficient covariance is propagated
//! with the sandwich form
//!
//! cov = (M + alpha R)^-1 M (M + alpha R)^-1
//!
//! which reduces to M^-1 when alpha = 0.
//!
//! Cholesky is attempted first. A failed pivot check does not abort the
//! solve: the inverse is rebuilt from a spectral pseudo-inverse, dropping
//! eigenvalues below tolerance. Only a system whose entire spectrum is
//! below tolerance is reported as singular.

use crate::design::DesignMatrix;
use crate::error::{PriftError, Result};
use crate::utils::linalg;
use log::{debug, warn};
use ndarray::{Array1, Array2};

/// Relative eigenvalue cutoff for the pseudo-inverse fallback.
const PINV_RCOND: f64 = 1e-12;

/// Output of the direct solver.
#[derive(Debug, Clone)]
pub struct DirectSolution {
    /// Expansion coefficients.
    pub coeffs: Array1<f64>,
    /// Coefficient covariance, symmetric.
    pub cov: Array2<f64>,
    /// Reduced chi-square of the coefficients against the weighted data.
    pub chi2: f64,
    /// Condition estimate of the regularized matrix (exact in the
    /// fallback path, a diagonal-of-L estimate in the Cholesky path).
    pub condition: f64,
    /// True when the pseudo-inverse fallback was taken.
    pub used_fallback: bool,
}

/// Invert `M + alpha R`, falling back to the spectral pseudo-inverse when
/// the Cholesky pivot check fails.
///
/// Returns the inverse, a condition estimate, and whether the fallback
/// path was taken. Shared between the direct solve and the covariance of
/// the optimizer path (which needs the same inverse at its own solution).
pub(crate) fn regularized_inverse(
    design: &DesignMatrix,
    alpha: f64,
) -> Result<(Array2<f64>, f64, bool)> {
    let n = design.n_coeff();
    let system = &design.normal + &(&design.reg * alpha);

    match linalg::cholesky_factor(&system) {
        Some(l) => {
            let mut dmin = f64::INFINITY;
            let mut dmax = 0.0f64;
            for i in 0..n {
                dmin = dmin.min(l[[i, i]]);
                dmax = dmax.max(l[[i, i]]);
            }
            let condition = (dmax / dmin).powi(2);
            Ok((linalg::cholesky_inverse(&l), condition, false))
        }
        None => {
            debug!("Cholesky pivot failed, falling back to spectral pseudo-inverse");
            let (evals, evecs) = linalg::jacobi_eigh(&system)?;
            let (pinv, kept) = linalg::pinv_from_eigh(&evals, &evecs, PINV_RCOND)
                .ok_or(PriftError::SingularSystem)?;
            if kept < n {
                warn!(
                    "regularized system is rank deficient: kept {} of {} eigenvalues",
                    kept, n
                );
            }
            let condition = linalg::spectral_condition(&evals, PINV_RCOND);
            Ok((pinv, condition, true))
        }
    }
}

/// Sandwich covariance `S^-1 M S^-1` for a given regularized inverse.
pub(crate) fn sandwich_covariance(design: &DesignMatrix, sinv: &Array2<f64>) -> Array2<f64> {
    let mut cov = sinv.dot(&design.normal).dot(sinv);
    linalg::symmetrize(&mut cov);
    cov
}

/// Solve the regularized system assembled in `design` with the given
/// regularization strength.
///
/// # Errors
///
/// * `PriftError::SingularSystem` when the system has rank zero
/// * `PriftError::ConvergenceFailure` if the eigen-sweep fails
pub fn solve_direct(design: &DesignMatrix, alpha: f64) -> Result<DirectSolution> {
    let (sinv, condition, used_fallback) = regularized_inverse(design, alpha)?;

    let coeffs = sinv.dot(&design.rhs);
    let cov = sandwich_covariance(design, &sinv);
    let chi2 = design.chi2(&coeffs);
    debug!(
        "direct solve: n_coeff={} alpha={:.3e} chi2={:.6e} condition={:.3e}",
        design.n_coeff(),
        alpha,
        chi2,
        condition
    );

    Ok(DirectSolution {
        coeffs,
        cov,
        chi2,
        condition,
        used_fallback,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basis::SineBasis;
    use crate::config::InversionConfig;
    use crate::dataset::Dataset;
    use approx::assert_relative_eq;
    use ndarray::Array1;

    /// Dataset whose intensities are exactly the first basis transform,
    /// so the unregularized solution is the one-hot vector.
    fn one_hot_dataset(d_max: f64, nfunc: usize, npts: usize) -> Dataset {
        let basis = SineBasis::new(d_max, nfunc, false);
        let x = Array1::from_shape_fn(npts, |i| 0.002 + 0.25 * i as f64 / (npts - 1) as f64);
        let y = x.mapv(|q| basis.eval_q(0, q));
        let err = Array1::from_elem(npts, 1.0);
        Dataset::from_arrays(x, y, err).unwrap()
    }

    #[test]
    fn test_recovers_one_hot_coefficients() {
        let data = one_hot_dataset(160.0, 4, 60);
        let config = InversionConfig::new().with_d_max(160.0);
        let design = DesignMatrix::build(&data, &config, 4).unwrap();

        let solution = solve_direct(&design, 0.0).unwrap();
        assert!(!solution.used_fallback);
        assert_relative_eq!(solution.coeffs[0], 1.0, epsilon = 1e-8);
        for j in 1..4 {
            assert_relative_eq!(solution.coeffs[j], 0.0, epsilon = 1e-8);
        }
        assert!(solution.chi2 < 1e-12);
    }

    #[test]
    fn test_unregularized_covariance_is_normal_inverse() {
        let data = one_hot_dataset(160.0, 3, 40);
        let config = InversionConfig::new().with_d_max(160.0);
        let design = DesignMatrix::build(&data, &config, 3).unwrap();

        let solution = solve_direct(&design, 0.0).unwrap();

        // cov * M should be the identity when alpha = 0
        let prod = solution.cov.dot(&design.normal);
        for i in 0..3 {
            for j in 0..3 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_relative_eq!(prod[[i, j]], expected, epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn test_covariance_is_symmetric() {
        let data = one_hot_dataset(160.0, 5, 50);
        let config = InversionConfig::new().with_d_max(160.0);
        let design = DesignMatrix::build(&data, &config, 5).unwrap();

        for &alpha in &[0.0, 1e-6, 1e-2] {
            let solution = solve_direct(&design, alpha).unwrap();
            for i in 0..5 {
                for j in 0..5 {
                    assert_eq!(solution.cov[[i, j]], solution.cov[[j, i]]);
                }
            }
        }
    }

    #[test]
    fn test_stronger_regularization_smooths() {
        let data = one_hot_dataset(160.0, 6, 30);
        let config = InversionConfig::new().with_d_max(160.0);
        let design = DesignMatrix::build(&data, &config, 6).unwrap();

        let scale = design.signal_scale() / design.penalty_scale();
        let soft = solve_direct(&design, scale * 1e-6).unwrap();
        let hard = solve_direct(&design, scale * 1e2).unwrap();

        assert!(design.penalty(&hard.coeffs) < design.penalty(&soft.coeffs));
    }

    #[test]
    fn test_rank_deficient_fallback() {
        // Two data points cannot determine six coefficients without
        // regularization; the normal matrix is rank deficient and the
        // Cholesky pivot check fails.
        let data = one_hot_dataset(160.0, 6, 2);
        let config = InversionConfig::new().with_d_max(160.0);
        let design = DesignMatrix::build(&data, &config, 6).unwrap();

        let solution = solve_direct(&design, 0.0).unwrap();
        assert!(solution.used_fallback);
        assert!(solution.coeffs.iter().all(|c| c.is_finite()));
        assert!(solution.cov.iter().all(|c| c.is_finite()));
        // The minimum-norm solution still reproduces the two observations
        assert!(solution.chi2 < 1e-9);
    }
}

//! Sine basis functions for the P(r) expansion.
//!
//! The pair-distance distribution is expanded on [0, d_max] as
//!
//! P(r) = sum_n c_n * phi_n(r),    phi_n(r) = 2 r sin(n pi r / d_max)
//!
//! which vanishes at r = 0 and r = d_max for every term. Its Fourier
//! counterpart in reciprocal space is
//!
//! Psi_n(q) = 8 pi^2 d_max n (-1)^(n+1) sin(q d_max) / (q (n^2 pi^2 - (q d_max)^2))
//!
//! so a scattered intensity I(q) = sum_n c_n * Psi_n(q) can be fitted
//! linearly in the coefficients. The removable singularity of Psi_n at
//! q d_max = n pi is handled by an exact rewriting, not by special-casing.
//!
//! An optional background slot appends one more column that contributes a
//! constant 1 in q space and nothing in real space, letting a flat
//! background be fitted together with the distribution.

use ndarray::Array2;
use std::f64::consts::PI;

/// sin(x)/x with a series expansion guard at small |x|.
fn sinc(x: f64) -> f64 {
    if x.abs() < 1e-4 {
        1.0 - x * x / 6.0
    } else {
        x.sin() / x
    }
}

/// The sine basis on [0, d_max] with an optional trailing background slot.
///
/// Columns are indexed 0-based: column `j < n_terms` holds the term
/// n = j + 1, and, when the background slot is enabled, column `n_terms`
/// holds the flat background.
#[derive(Debug, Clone)]
pub struct SineBasis {
    d_max: f64,
    n_terms: usize,
    with_background: bool,
}

impl SineBasis {
    /// Create a basis of `n_terms` sine terms on [0, d_max].
    ///
    /// # Arguments
    ///
    /// * `d_max` - Maximum particle dimension, must be positive
    /// * `n_terms` - Number of sine terms, must be at least 1
    /// * `with_background` - Append the flat-background column
    ///
    /// # Panics
    ///
    /// Panics on `d_max <= 0` or `n_terms == 0`; callers validate
    /// user-supplied values before constructing a basis.
    pub fn new(d_max: f64, n_terms: usize, with_background: bool) -> Self {
        assert!(d_max > 0.0, "d_max must be positive");
        assert!(n_terms >= 1, "basis needs at least one term");
        Self {
            d_max,
            n_terms,
            with_background,
        }
    }

    /// Total number of columns, including the background slot if enabled.
    pub fn len(&self) -> usize {
        self.n_terms + usize::from(self.with_background)
    }

    /// True when the basis has no columns. Never the case after `new`.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of sine terms (excluding the background slot).
    pub fn n_terms(&self) -> usize {
        self.n_terms
    }

    pub fn d_max(&self) -> f64 {
        self.d_max
    }

    pub fn has_background(&self) -> bool {
        self.with_background
    }

    fn is_background(&self, j: usize) -> bool {
        self.with_background && j == self.n_terms
    }

    /// Real-space value of column `j` at distance `r`.
    ///
    /// phi_n(r) = 2 r sin(n pi r / d_max); the background column is 0.
    pub fn eval_r(&self, j: usize, r: f64) -> f64 {
        if self.is_background(j) {
            return 0.0;
        }
        let a = (j + 1) as f64 * PI / self.d_max;
        2.0 * r * (a * r).sin()
    }

    /// First derivative of column `j` with respect to r.
    pub fn eval_dr(&self, j: usize, r: f64) -> f64 {
        if self.is_background(j) {
            return 0.0;
        }
        let a = (j + 1) as f64 * PI / self.d_max;
        2.0 * (a * r).sin() + 2.0 * a * r * (a * r).cos()
    }

    /// Second derivative of column `j` with respect to r.
    pub fn eval_d2r(&self, j: usize, r: f64) -> f64 {
        if self.is_background(j) {
            return 0.0;
        }
        let a = (j + 1) as f64 * PI / self.d_max;
        4.0 * a * (a * r).cos() - 2.0 * a * a * r * (a * r).sin()
    }

    /// Reciprocal-space value of column `j` at momentum transfer `q > 0`.
    ///
    /// Evaluated through the exact identity
    ///
    /// Psi_n(q) = 8 pi^2 d_max n sinc(delta) / (q (2 n pi + delta)),
    /// delta = q d_max - n pi
    ///
    /// which is finite everywhere on q > 0; at q d_max = n pi it reduces to
    /// the analytic limit 4 pi d_max / q. The background column is 1.
    pub fn eval_q(&self, j: usize, q: f64) -> f64 {
        if self.is_background(j) {
            return 1.0;
        }
        let n = (j + 1) as f64;
        let delta = q * self.d_max - n * PI;
        8.0 * PI * PI * self.d_max * n * sinc(delta) / (q * (2.0 * n * PI + delta))
    }

    /// Integral of column `j` over [0, d_max]:
    /// int phi_n dr = 2 d_max^2 (-1)^(n+1) / (n pi).
    pub fn integral(&self, j: usize) -> f64 {
        if self.is_background(j) {
            return 0.0;
        }
        let n = (j + 1) as f64;
        let sign = if j % 2 == 0 { 1.0 } else { -1.0 };
        2.0 * self.d_max * self.d_max * sign / (n * PI)
    }

    /// Second moment of column `j` over [0, d_max]:
    /// int r^2 phi_n dr = 2 d_max^4 (-1)^(n+1) (1/(n pi) - 6/(n pi)^3).
    pub fn second_moment(&self, j: usize) -> f64 {
        if self.is_background(j) {
            return 0.0;
        }
        let npi = (j + 1) as f64 * PI;
        let sign = if j % 2 == 0 { 1.0 } else { -1.0 };
        2.0 * self.d_max.powi(4) * sign * (1.0 / npi - 6.0 / npi.powi(3))
    }

    /// Smoothness-penalty Gram matrix R with entries
    ///
    /// R[n][m] = int_0^d_max phi_n'' phi_m'' dr
    ///
    /// in closed form:
    ///
    /// R_nn = 11 n^2 pi^2 / d_max + (2/3) n^4 pi^4 / d_max
    /// R_nm = (8 pi^2 (-1)^(n+m) n m / d_max) (1 + 2 n^2 m^2 / (n^2 - m^2)^2)
    ///
    /// R is symmetric positive semi-definite. The background row and column
    /// are zero so the flat background is never penalized.
    pub fn regularizer(&self) -> Array2<f64> {
        let size = self.len();
        let mut r = Array2::zeros((size, size));
        for i in 0..self.n_terms {
            let ni = (i + 1) as f64;
            r[[i, i]] = 11.0 * ni * ni * PI * PI / self.d_max
                + (2.0 / 3.0) * ni.powi(4) * PI.powi(4) / self.d_max;
            for j in (i + 1)..self.n_terms {
                let nj = (j + 1) as f64;
                let sign = if (i + j) % 2 == 0 { 1.0 } else { -1.0 };
                let diff = ni * ni - nj * nj;
                let val = 8.0 * PI * PI * sign * ni * nj / self.d_max
                    * (1.0 + 2.0 * ni * ni * nj * nj / (diff * diff));
                r[[i, j]] = val;
                r[[j, i]] = val;
            }
        }
        r
    }
}

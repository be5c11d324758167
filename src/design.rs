//! Assembly of the weighted linear system for one inversion.
//!
//! Fitting P(r) to measured intensities is linear in the expansion
//! coefficients: each active data point contributes one row
//! `A[i][j] = Psi_j(q_i)` (slit-smeared when the dataset carries slit
//! dimensions), weighted by `w_i = 1/sigma_i`. The solver consumes the
//! normal-equation products `M = A_w^T A_w` and `v = A_w^T b_w` together
//! with the smoothness penalty matrix of the basis.
//!
//! This module is the only place that knows about the fitting window,
//! the uncertainty floor, and the slit geometry.

use crate::basis::SineBasis;
use crate::config::InversionConfig;
use crate::dataset::Dataset;
use crate::error::{PriftError, Result};
use crate::utils::matrix_convert::{
    faer_to_ndarray, faer_vec_to_ndarray, ndarray_to_faer, ndarray_vec_to_faer,
};
use ndarray::{Array1, Array2};

/// Number of quadrature points per active slit axis.
const SLIT_QUAD_POINTS: usize = 21;

/// Zero uncertainties are floored to this fraction of the largest
/// uncertainty, turning them into very-high-weight points instead of a
/// division by zero.
const SIGMA_FLOOR_FRACTION: f64 = 1e-8;

/// The weighted system for one (dataset, configuration, basis size) triple.
#[derive(Debug, Clone)]
pub struct DesignMatrix {
    basis: SineBasis,
    /// Weighted design rows, one per active data point.
    pub a_w: Array2<f64>,
    /// Weighted observations (background-subtracted when the background
    /// is fixed).
    pub b_w: Array1<f64>,
    /// Normal matrix `A_w^T A_w`.
    pub normal: Array2<f64>,
    /// Right-hand side `A_w^T b_w`.
    pub rhs: Array1<f64>,
    /// Smoothness penalty matrix of the basis.
    pub reg: Array2<f64>,
    /// Number of data points inside the fitting window.
    pub n_active: usize,
}

impl DesignMatrix {
    /// Build the weighted system.
    ///
    /// # Arguments
    ///
    /// * `data` - Measured dataset; must be consistent and have at least
    ///   one point inside the fitting window
    /// * `config` - Inversion configuration (d_max, background handling)
    /// * `nfunc` - Number of sine terms
    ///
    /// # Errors
    ///
    /// * `PriftError::InvalidInput` for a bad configuration or an empty
    ///   fitting window
    /// * `PriftError::DimensionMismatch` if the data arrays disagree
    /// * `PriftError::DegenerateWeights` if every uncertainty in the
    ///   window is zero
    pub fn build(data: &Dataset, config: &InversionConfig, nfunc: usize) -> Result<Self> {
        if nfunc == 0 {
            return Err(PriftError::InvalidInput(
                "number of basis terms must be at least 1".to_string(),
            ));
        }
        if config.d_max <= 0.0 {
            return Err(PriftError::InvalidInput(format!(
                "d_max must be positive, got {}",
                config.d_max
            )));
        }
        if config.alpha < 0.0 {
            return Err(PriftError::InvalidInput(format!(
                "alpha must be non-negative, got {}",
                config.alpha
            )));
        }
        data.check_consistent()?;

        let active = data.active_indices();
        if active.is_empty() {
            return Err(PriftError::InvalidInput(
                "no data points inside the fitting window".to_string(),
            ));
        }

        let sigma_max = active
            .iter()
            .map(|&i| data.err()[i].abs())
            .fold(0.0f64, f64::max);
        if sigma_max <= 0.0 {
            return Err(PriftError::DegenerateWeights(
                "every uncertainty in the fitting window is zero".to_string(),
            ));
        }
        let sigma_floor = SIGMA_FLOOR_FRACTION * sigma_max;

        let basis = SineBasis::new(config.d_max, nfunc, config.est_bck);
        let n_coeff = basis.len();
        let n_active = active.len();
        let smeared = data.is_smeared();

        let mut a_w = Array2::zeros((n_active, n_coeff));
        let mut b_w = Array1::zeros(n_active);
        for (row, &idx) in active.iter().enumerate() {
            let q = data.x()[idx];
            let w = 1.0 / data.err()[idx].abs().max(sigma_floor);
            for j in 0..n_coeff {
                let value = if smeared {
                    smeared_transform(&basis, j, q, data.slit_width(), data.slit_height())
                } else {
                    basis.eval_q(j, q)
                };
                a_w[[row, j]] = value * w;
            }
            let observed = if config.est_bck {
                data.y()[idx]
            } else {
                data.y()[idx] - config.background
            };
            b_w[row] = observed * w;
        }

        // Normal-equation products through faer
        let a_f = ndarray_to_faer(&a_w)?;
        let b_f = ndarray_vec_to_faer(&b_w)?;
        let normal_f = a_f.transpose() * &a_f;
        let rhs_f = a_f.transpose() * &b_f;
        let normal = faer_to_ndarray(&normal_f)?;
        let rhs = faer_vec_to_ndarray(&rhs_f)?;

        let reg = basis.regularizer();

        Ok(Self {
            basis,
            a_w,
            b_w,
            normal,
            rhs,
            reg,
            n_active,
        })
    }

    pub fn basis(&self) -> &SineBasis {
        &self.basis
    }

    /// Number of fitted coefficients (terms plus the background slot).
    pub fn n_coeff(&self) -> usize {
        self.basis.len()
    }

    /// Weighted residual sum of squares of a coefficient vector.
    pub fn rss(&self, x: &Array1<f64>) -> f64 {
        let resid = self.a_w.dot(x) - &self.b_w;
        resid.dot(&resid)
    }

    /// Reduced chi-square of a coefficient vector against the weighted data.
    pub fn chi2(&self, x: &Array1<f64>) -> f64 {
        self.rss(x) / self.n_active as f64
    }

    /// Smoothness penalty `x^T R x` of a coefficient vector.
    pub fn penalty(&self, x: &Array1<f64>) -> f64 {
        x.dot(&self.reg.dot(x))
    }

    /// Squared Frobenius norm of the weighted design, the natural scale of
    /// the data term in the regularized objective.
    pub fn signal_scale(&self) -> f64 {
        self.a_w.iter().map(|v| v * v).sum()
    }

    /// Trace of the penalty matrix, the natural scale of the smoothness
    /// term.
    pub fn penalty_scale(&self) -> f64 {
        self.reg.diag().sum()
    }
}

/// Average of `Psi_j` over the rectangular slit kernel.
///
/// 21 points per active axis (a zero-size axis collapses to a single
/// point), z in [0, height], y in [-width/2, +width/2], evaluating at
/// sqrt((q - y)^2 + z^2) and skipping non-positive radicands.
pub(crate) fn smeared_transform(
    basis: &SineBasis,
    j: usize,
    q: f64,
    width: f64,
    height: f64,
) -> f64 {
    let n_height = if height > 0.0 { SLIT_QUAD_POINTS } else { 1 };
    let n_width = if width > 0.0 { SLIT_QUAD_POINTS } else { 1 };
    let span = (SLIT_QUAD_POINTS - 1) as f64;

    let mut sum = 0.0;
    let mut count = 0usize;
    for iz in 0..n_height {
        let z = if height > 0.0 {
            height * iz as f64 / span
        } else {
            0.0
        };
        for iy in 0..n_width {
            let y = if width > 0.0 {
                -0.5 * width + width * iy as f64 / span
            } else {
                0.0
            };
            let q_sq = (q - y) * (q - y) + z * z;
            if q_sq <= 0.0 {
                continue;
            }
            sum += basis.eval_q(j, q_sq.sqrt());
            count += 1;
        }
    }
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

//! High-level interface for the P(r) inversion.
//!
//! An [`Invertor`] owns one dataset and one configuration, runs solves
//! (direct least squares or the derivative-free optimizer), stores the
//! most recent result, and provides evaluation and quality diagnostics
//! for any coefficient vector. Cloning an Invertor is the snapshot
//! operation used by background workers and by the Dmax explorer: the
//! clone is fully independent of the original.

use crate::config::InversionConfig;
use crate::dataset::Dataset;
use crate::design::{self, DesignMatrix};
use crate::error::{PriftError, Result};
use crate::estimate::{self, AlphaEstimate, TermsEstimate};
use crate::solver::{self, SimplexConfig};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Instant;

/// Number of points in the internal diagnostic r-grid.
const DIAGNOSTIC_POINTS: usize = 51;

/// Output of one solve.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InversionResult {
    /// Expansion coefficients; with background estimation the fitted
    /// background is appended as the last element.
    pub out: Array1<f64>,
    /// Coefficient covariance, symmetric, same ordering as `out`.
    pub cov: Array2<f64>,
    /// Reduced chi-square (weighted residual sum of squares over the
    /// number of active points). NaN flags an aborted optimizer solve.
    pub chi2: f64,
    /// Wall-clock time of the solve in seconds.
    pub elapsed: f64,
}

impl fmt::Display for InversionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Inversion Result:")?;
        writeln!(f, "  Coefficients: {}", self.out.len())?;
        writeln!(f, "  Chi2 (reduced): {:.6e}", self.chi2)?;
        writeln!(f, "  Elapsed: {:.3} s", self.elapsed)
    }
}

/// P(r) inversion engine for one dataset.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Invertor {
    data: Dataset,
    config: InversionConfig,
    result: Option<InversionResult>,
}

impl Invertor {
    /// Create an engine with an empty dataset and default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an engine with the given configuration.
    pub fn with_config(config: InversionConfig) -> Self {
        Self {
            data: Dataset::new(),
            config,
            result: None,
        }
    }

    // ----- data access -------------------------------------------------

    pub fn data(&self) -> &Dataset {
        &self.data
    }

    pub fn config(&self) -> &InversionConfig {
        &self.config
    }

    /// Assign all three measurement arrays at once.
    pub fn set_data(&mut self, x: Array1<f64>, y: Array1<f64>, err: Array1<f64>) -> Result<()> {
        if x.len() != y.len() || x.len() != err.len() {
            return Err(PriftError::DimensionMismatch(format!(
                "x has {} points, y has {}, err has {}",
                x.len(),
                y.len(),
                err.len()
            )));
        }
        self.data.set_x(x)?;
        self.data.set_y(y);
        self.data.set_err(err);
        Ok(())
    }

    /// Assign the q array; every value must be strictly positive.
    pub fn set_x(&mut self, x: Array1<f64>) -> Result<()> {
        self.data.set_x(x)
    }

    pub fn set_y(&mut self, y: Array1<f64>) {
        self.data.set_y(y)
    }

    pub fn set_err(&mut self, err: Array1<f64>) {
        self.data.set_err(err)
    }

    pub fn set_q_min(&mut self, q_min: Option<f64>) {
        self.data.set_q_min(q_min)
    }

    pub fn set_q_max(&mut self, q_max: Option<f64>) {
        self.data.set_q_max(q_max)
    }

    pub fn q_min(&self) -> Option<f64> {
        self.data.q_min()
    }

    pub fn q_max(&self) -> Option<f64> {
        self.data.q_max()
    }

    pub fn set_slit_width(&mut self, width: f64) -> Result<()> {
        self.data.set_slit_width(width)
    }

    pub fn set_slit_height(&mut self, height: f64) -> Result<()> {
        self.data.set_slit_height(height)
    }

    pub fn slit_width(&self) -> f64 {
        self.data.slit_width()
    }

    pub fn slit_height(&self) -> f64 {
        self.data.slit_height()
    }

    /// Number of stored data points.
    pub fn npts(&self) -> usize {
        self.data.len()
    }

    // ----- configuration -----------------------------------------------

    /// Set the maximum dimension; must be positive.
    pub fn set_d_max(&mut self, d_max: f64) -> Result<()> {
        if !(d_max > 0.0) {
            return Err(PriftError::InvalidInput(format!(
                "d_max must be positive, got {}",
                d_max
            )));
        }
        self.config.d_max = d_max;
        Ok(())
    }

    pub fn d_max(&self) -> f64 {
        self.config.d_max
    }

    /// Set the regularization strength; must be non-negative.
    pub fn set_alpha(&mut self, alpha: f64) -> Result<()> {
        if !(alpha >= 0.0) {
            return Err(PriftError::InvalidInput(format!(
                "alpha must be non-negative, got {}",
                alpha
            )));
        }
        self.config.alpha = alpha;
        Ok(())
    }

    pub fn alpha(&self) -> f64 {
        self.config.alpha
    }

    pub fn set_est_bck(&mut self, est_bck: bool) {
        self.config.est_bck = est_bck;
    }

    pub fn est_bck(&self) -> bool {
        self.config.est_bck
    }

    pub fn set_background(&mut self, background: f64) {
        self.config.background = background;
    }

    pub fn background(&self) -> f64 {
        self.config.background
    }

    // ----- solving -----------------------------------------------------

    /// Direct regularized least-squares solve with `nfunc` sine terms.
    ///
    /// Builds the weighted design, solves the regularized normal
    /// equations, stores the result, and returns the coefficients and
    /// their covariance. An empty dataset, or a q-window that excludes
    /// every point, yields a zero-length result without error so callers
    /// can probe an unconfigured engine.
    pub fn lstsq(&mut self, nfunc: usize) -> Result<(Array1<f64>, Array2<f64>)> {
        let start = Instant::now();
        self.data.check_consistent()?;
        if self.data.active_indices().is_empty() {
            return Ok(self.store_degenerate(start));
        }

        let design = DesignMatrix::build(&self.data, &self.config, nfunc)?;
        let solution = solver::solve_direct(&design, self.config.alpha)?;

        let result = InversionResult {
            out: solution.coeffs,
            cov: solution.cov,
            chi2: solution.chi2,
            elapsed: start.elapsed().as_secs_f64(),
        };
        let out = result.out.clone();
        let cov = result.cov.clone();
        self.result = Some(result);
        Ok((out, cov))
    }

    /// Solve by minimizing the regularized objective with the
    /// derivative-free optimizer. Equivalent to [`Invertor::lstsq`] on
    /// well-posed problems; kept as the default entry point because it
    /// tolerates cancellation.
    pub fn invert(&mut self, nfunc: usize) -> Result<(Array1<f64>, Array2<f64>)> {
        self.invert_optimize(nfunc)
    }

    /// Optimizer-path solve without a cancellation hook.
    pub fn invert_optimize(&mut self, nfunc: usize) -> Result<(Array1<f64>, Array2<f64>)> {
        self.invert_optimize_abortable(nfunc, || false)
    }

    /// Optimizer-path solve polling `abort` once per iteration.
    ///
    /// The simplex is seeded at the direct solution and polishes it, so
    /// the two paths agree on well-posed problems. When the predicate
    /// turns true the best coefficients found so far are stored with
    /// `chi2 = NaN` to mark the partial solve, and the call still
    /// returns them normally.
    pub fn invert_optimize_abortable(
        &mut self,
        nfunc: usize,
        abort: impl Fn() -> bool,
    ) -> Result<(Array1<f64>, Array2<f64>)> {
        let start = Instant::now();
        self.data.check_consistent()?;
        if self.data.active_indices().is_empty() {
            return Ok(self.store_degenerate(start));
        }

        let design = DesignMatrix::build(&self.data, &self.config, nfunc)?;
        let alpha = self.config.alpha;
        let (sinv, _, _) = solver::direct::regularized_inverse(&design, alpha)?;
        let seed = sinv.dot(&design.rhs);

        let objective = |x: &Array1<f64>| design.rss(x) + alpha * design.penalty(x);
        let sres = solver::minimize(objective, &seed, &SimplexConfig::default(), abort);

        let cov = solver::direct::sandwich_covariance(&design, &sinv);
        let chi2 = if sres.aborted {
            f64::NAN
        } else {
            design.chi2(&sres.x)
        };

        let result = InversionResult {
            out: sres.x,
            cov,
            chi2,
            elapsed: start.elapsed().as_secs_f64(),
        };
        let out = result.out.clone();
        let cov = result.cov.clone();
        self.result = Some(result);
        Ok((out, cov))
    }

    fn store_degenerate(&mut self, start: Instant) -> (Array1<f64>, Array2<f64>) {
        let result = InversionResult {
            out: Array1::zeros(0),
            cov: Array2::zeros((0, 0)),
            chi2: 0.0,
            elapsed: start.elapsed().as_secs_f64(),
        };
        self.result = Some(result);
        (Array1::zeros(0), Array2::zeros((0, 0)))
    }

    // ----- result access -----------------------------------------------

    /// Most recent solve result, if any.
    pub fn result(&self) -> Option<&InversionResult> {
        self.result.as_ref()
    }

    pub(crate) fn set_result(&mut self, result: Option<InversionResult>) {
        self.result = result;
    }

    /// Reduced chi-square of the most recent solve; 0.0 before any solve,
    /// NaN after an aborted optimizer solve.
    pub fn chi2(&self) -> f64 {
        self.result.as_ref().map_or(0.0, |r| r.chi2)
    }

    /// Wall time of the most recent solve in seconds; 0.0 before any
    /// solve.
    pub fn elapsed(&self) -> f64 {
        self.result.as_ref().map_or(0.0, |r| r.elapsed)
    }

    // ----- evaluation --------------------------------------------------

    /// Basis matching a coefficient vector of the given length under the
    /// current configuration. With background estimation the last
    /// coefficient is the background slot; a single coefficient is always
    /// a sine term.
    fn basis_for(&self, n_coeffs: usize) -> crate::basis::SineBasis {
        debug_assert!(n_coeffs >= 1);
        if self.config.est_bck && n_coeffs >= 2 {
            crate::basis::SineBasis::new(self.config.d_max, n_coeffs - 1, true)
        } else {
            crate::basis::SineBasis::new(self.config.d_max, n_coeffs, false)
        }
    }

    /// Evaluate P(r) for a coefficient vector.
    pub fn pr(&self, coeffs: &Array1<f64>, r: f64) -> f64 {
        if coeffs.is_empty() {
            return 0.0;
        }
        let basis = self.basis_for(coeffs.len());
        (0..coeffs.len()).map(|j| coeffs[j] * basis.eval_r(j, r)).sum()
    }

    /// Evaluate P(r) with its 1-sigma uncertainty propagated from the
    /// coefficient covariance.
    pub fn pr_err(&self, coeffs: &Array1<f64>, cov: &Array2<f64>, r: f64) -> (f64, f64) {
        if coeffs.is_empty() {
            return (0.0, 0.0);
        }
        let basis = self.basis_for(coeffs.len());
        let phi: Vec<f64> = (0..coeffs.len()).map(|j| basis.eval_r(j, r)).collect();

        let mut value = 0.0;
        let mut variance = 0.0;
        for i in 0..coeffs.len() {
            value += coeffs[i] * phi[i];
            for j in 0..coeffs.len() {
                variance += cov[[i, j]] * phi[i] * phi[j];
            }
        }
        (value, variance.max(0.0).sqrt())
    }

    /// Evaluate the model intensity I(q), including the fitted or fixed
    /// background, so the curve is directly comparable to the data.
    pub fn iq(&self, coeffs: &Array1<f64>, q: f64) -> f64 {
        if coeffs.is_empty() {
            return if self.config.est_bck {
                0.0
            } else {
                self.config.background
            };
        }
        let basis = self.basis_for(coeffs.len());
        let mut value: f64 = (0..coeffs.len()).map(|j| coeffs[j] * basis.eval_q(j, q)).sum();
        if !self.config.est_bck {
            value += self.config.background;
        }
        value
    }

    /// Evaluate the slit-smeared model intensity using the dataset's
    /// slit dimensions.
    pub fn iq_smeared(&self, coeffs: &Array1<f64>, q: f64) -> f64 {
        if coeffs.is_empty() || !self.data.is_smeared() {
            return self.iq(coeffs, q);
        }
        let basis = self.basis_for(coeffs.len());
        let mut value: f64 = (0..coeffs.len())
            .map(|j| {
                coeffs[j]
                    * design::smeared_transform(
                        &basis,
                        j,
                        q,
                        self.data.slit_width(),
                        self.data.slit_height(),
                    )
            })
            .sum();
        if !self.config.est_bck {
            value += self.config.background;
        }
        value
    }

    fn pr_slope(&self, coeffs: &Array1<f64>, r: f64) -> f64 {
        let basis = self.basis_for(coeffs.len());
        (0..coeffs.len()).map(|j| coeffs[j] * basis.eval_dr(j, r)).sum()
    }

    fn diagnostic_grid(&self) -> Vec<f64> {
        let dr = self.config.d_max / (DIAGNOSTIC_POINTS - 1) as f64;
        (0..DIAGNOSTIC_POINTS).map(|i| i as f64 * dr).collect()
    }

    // ----- diagnostics -------------------------------------------------

    /// Fraction of the distribution's mass that is positive, in [0, 1].
    pub fn get_positive(&self, coeffs: &Array1<f64>) -> f64 {
        if coeffs.is_empty() {
            return 1.0;
        }
        let mut positive = 0.0;
        let mut total = 0.0;
        for r in self.diagnostic_grid() {
            let p = self.pr(coeffs, r);
            total += p.abs();
            if p > 0.0 {
                positive += p;
            }
        }
        if total <= 0.0 {
            // An identically zero distribution has no negative mass
            1.0
        } else {
            positive / total
        }
    }

    /// Fraction of the distribution's mass that stays within one standard
    /// deviation of positive, in [0, 1].
    pub fn get_pos_err(&self, coeffs: &Array1<f64>, cov: &Array2<f64>) -> f64 {
        if coeffs.is_empty() {
            return 1.0;
        }
        let mut tolerated = 0.0;
        let mut total = 0.0;
        for r in self.diagnostic_grid() {
            let (p, sigma) = self.pr_err(coeffs, cov, r);
            total += p.abs();
            if p >= -sigma {
                tolerated += p.abs();
            }
        }
        if total <= 0.0 {
            1.0
        } else {
            tolerated / total
        }
    }

    /// Oscillation indicator: the first-derivative energy of P relative
    /// to a single smooth lobe. Values near 1.1 indicate a smooth
    /// single-mode distribution; large values indicate ringing.
    pub fn oscillations(&self, coeffs: &Array1<f64>) -> f64 {
        if coeffs.is_empty() {
            return 0.0;
        }
        let mut sum_dp2 = 0.0;
        let mut sum_p2 = 0.0;
        for r in self.diagnostic_grid() {
            let p = self.pr(coeffs, r);
            let dp = self.pr_slope(coeffs, r);
            sum_p2 += p * p;
            sum_dp2 += dp * dp;
        }
        if sum_p2 <= 0.0 {
            return 0.0;
        }
        (sum_dp2 / sum_p2).sqrt() / (std::f64::consts::PI / self.config.d_max)
    }

    /// Number of local maxima of P over the diagnostic grid. A physically
    /// sensible distribution for a compact particle has exactly one.
    pub fn get_peaks(&self, coeffs: &Array1<f64>) -> usize {
        if coeffs.is_empty() {
            return 0;
        }
        let mut count = 0;
        let mut previous = 0.0;
        let mut slope = 0i32;
        for r in self.diagnostic_grid() {
            let value = self.pr(coeffs, r);
            if previous <= value {
                slope = 1;
            } else {
                if slope > 0 {
                    count += 1;
                }
                slope = -1;
            }
            previous = value;
        }
        count
    }

    /// Radius of gyration from the distribution moments,
    /// `Rg^2 = int r^2 P dr / (2 int P dr)`, using the exact basis
    /// integrals.
    pub fn rg(&self, coeffs: &Array1<f64>) -> f64 {
        if coeffs.is_empty() {
            return 0.0;
        }
        let basis = self.basis_for(coeffs.len());
        let mut m0 = 0.0;
        let mut m2 = 0.0;
        for j in 0..coeffs.len() {
            m0 += coeffs[j] * basis.integral(j);
            m2 += coeffs[j] * basis.second_moment(j);
        }
        if m0 == 0.0 {
            return 0.0;
        }
        (m2 / (2.0 * m0)).sqrt()
    }

    /// Forward-scattering intensity `I(0) = 4 pi int P dr`, using the
    /// exact basis integrals.
    pub fn iq0(&self, coeffs: &Array1<f64>) -> f64 {
        if coeffs.is_empty() {
            return 0.0;
        }
        let basis = self.basis_for(coeffs.len());
        let m0: f64 = (0..coeffs.len()).map(|j| coeffs[j] * basis.integral(j)).sum();
        4.0 * std::f64::consts::PI * m0
    }

    // ----- resampled curves --------------------------------------------

    /// P(r) sampled on `npts` evenly spaced points over [0, d_max].
    pub fn pr_curve(&self, coeffs: &Array1<f64>, npts: usize) -> (Array1<f64>, Array1<f64>) {
        let r = linspace(0.0, self.config.d_max, npts);
        let p = r.mapv(|ri| self.pr(coeffs, ri));
        (r, p)
    }

    /// P(r) with 1-sigma uncertainties on `npts` evenly spaced points.
    pub fn pr_err_curve(
        &self,
        coeffs: &Array1<f64>,
        cov: &Array2<f64>,
        npts: usize,
    ) -> (Array1<f64>, Array1<f64>, Array1<f64>) {
        let r = linspace(0.0, self.config.d_max, npts);
        let mut p = Array1::zeros(npts);
        let mut sigma = Array1::zeros(npts);
        for (i, &ri) in r.iter().enumerate() {
            let (value, err) = self.pr_err(coeffs, cov, ri);
            p[i] = value;
            sigma[i] = err;
        }
        (r, p, sigma)
    }

    /// Model intensity sampled on `npts` evenly spaced q points.
    pub fn iq_curve(
        &self,
        coeffs: &Array1<f64>,
        q_min: f64,
        q_max: f64,
        npts: usize,
    ) -> Result<(Array1<f64>, Array1<f64>)> {
        if !(q_min > 0.0) || q_max < q_min {
            return Err(PriftError::InvalidInput(format!(
                "invalid q range [{}, {}]",
                q_min, q_max
            )));
        }
        let q = linspace(q_min, q_max, npts);
        let i = q.mapv(|qi| self.iq(coeffs, qi));
        Ok((q, i))
    }

    // ----- hyper-parameter search --------------------------------------

    /// Estimate a suitable regularization strength for `nfunc` terms.
    pub fn estimate_alpha(&self, nfunc: usize) -> Result<AlphaEstimate> {
        estimate::estimate_alpha(self, nfunc)
    }

    /// Estimate a suitable number of terms (and the matching alpha).
    pub fn estimate_numterms(&self) -> Result<TermsEstimate> {
        estimate::estimate_num_terms(self, || false)
    }

    // ----- persistence -------------------------------------------------

    /// Write the full engine state to a text file.
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        crate::state::save(self, path)
    }

    /// Restore an engine from a state file written by
    /// [`Invertor::to_file`].
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        crate::state::load(path)
    }
}

/// `npts` evenly spaced values from `start` to `stop` inclusive.
fn linspace(start: f64, stop: f64, npts: usize) -> Array1<f64> {
    match npts {
        0 => Array1::zeros(0),
        1 => Array1::from_vec(vec![start]),
        _ => {
            let step = (stop - start) / (npts - 1) as f64;
            Array1::from_shape_fn(npts, |i| start + step * i as f64)
        }
    }
}

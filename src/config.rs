//! Configuration for the inversion.

use serde::{Deserialize, Serialize};

/// Tunable parameters of a P(r) inversion.
///
/// The basis size is not part of the configuration: it is an argument of
/// each solve call, so the same configured problem can be solved with
/// different term counts (as the term-count estimator does).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InversionConfig {
    /// Maximum particle dimension, the upper end of the P(r) support.
    pub d_max: f64,
    /// Regularization strength multiplying the smoothness penalty.
    pub alpha: f64,
    /// Fit a flat background as an extra coefficient.
    pub est_bck: bool,
    /// Fixed background level, subtracted before the fit when `est_bck`
    /// is false.
    pub background: f64,
}

impl Default for InversionConfig {
    fn default() -> Self {
        Self {
            d_max: 180.0,
            alpha: 0.0,
            est_bck: false,
            background: 0.0,
        }
    }
}

impl InversionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum dimension.
    pub fn with_d_max(mut self, d_max: f64) -> Self {
        self.d_max = d_max;
        self
    }

    /// Set the regularization strength.
    pub fn with_alpha(mut self, alpha: f64) -> Self {
        self.alpha = alpha;
        self
    }

    /// Enable or disable background fitting.
    pub fn with_est_bck(mut self, est_bck: bool) -> Self {
        self.est_bck = est_bck;
        self
    }

    /// Set the fixed background level.
    pub fn with_background(mut self, background: f64) -> Self {
        self.background = background;
        self
    }
}

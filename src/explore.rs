//! Sweep of the maximum dimension.
//!
//! The right d_max is the one hyper-parameter with no closed-form
//! estimator, so it is explored: the same dataset is inverted at a range
//! of candidate values and the fit quality and distribution diagnostics
//! are tabulated for each. Trials are independent, so the sweep can also
//! run on the rayon pool.

use crate::error::{PriftError, Result};
use crate::invertor::Invertor;
use log::debug;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Aligned per-trial outputs of a d_max sweep.
///
/// All vectors have one entry per trial, in sweep order. A failed or
/// cancelled trial keeps its `d_max` entry and carries NaN in every
/// other slot; the cause is appended to `errors`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExplorationResult {
    /// Candidate maximum dimensions, in sweep order.
    pub d_max: Vec<f64>,
    /// Reduced chi-square per trial.
    pub chi2: Vec<f64>,
    /// Radius of gyration per trial.
    pub rg: Vec<f64>,
    /// Forward-scattering intensity per trial.
    pub iq0: Vec<f64>,
    /// Positive mass fraction per trial.
    pub positive_fraction: Vec<f64>,
    /// Oscillation diagnostic per trial.
    pub oscillations: Vec<f64>,
    /// Messages from failed or cancelled trials.
    pub errors: Vec<String>,
}

impl ExplorationResult {
    /// Number of trials recorded.
    pub fn len(&self) -> usize {
        self.d_max.len()
    }

    pub fn is_empty(&self) -> bool {
        self.d_max.is_empty()
    }

    fn push_trial(&mut self, d: f64, row: TrialRow) {
        self.d_max.push(d);
        self.chi2.push(row.chi2);
        self.rg.push(row.rg);
        self.iq0.push(row.iq0);
        self.positive_fraction.push(row.positive);
        self.oscillations.push(row.oscillations);
    }

    fn push_failure(&mut self, d: f64, message: String) {
        self.d_max.push(d);
        self.chi2.push(f64::NAN);
        self.rg.push(f64::NAN);
        self.iq0.push(f64::NAN);
        self.positive_fraction.push(f64::NAN);
        self.oscillations.push(f64::NAN);
        self.errors.push(message);
    }

    fn push_cancelled(&mut self, d: f64) {
        self.d_max.push(d);
        self.chi2.push(f64::NAN);
        self.rg.push(f64::NAN);
        self.iq0.push(f64::NAN);
        self.positive_fraction.push(f64::NAN);
        self.oscillations.push(f64::NAN);
    }
}

struct TrialRow {
    chi2: f64,
    rg: f64,
    iq0: f64,
    positive: f64,
    oscillations: f64,
}

/// Runs d_max sweeps against a snapshot of an [`Invertor`].
///
/// The explorer clones the engine at construction; the caller's engine
/// is never read again and never mutated.
pub struct DistExplorer {
    invertor: Invertor,
    nfunc: usize,
}

impl DistExplorer {
    /// Snapshot `invertor` for sweeping with `nfunc` terms per trial.
    pub fn new(invertor: &Invertor, nfunc: usize) -> Self {
        Self {
            invertor: invertor.clone(),
            nfunc,
        }
    }

    /// Sweep bounds bracketing the snapshot's current d_max by 20%.
    pub fn default_range(&self) -> (f64, f64) {
        let d = self.invertor.d_max();
        (0.8 * d, 1.2 * d)
    }

    /// Run the sweep over `n_steps` evenly spaced candidates in
    /// `[d_min, d_max]` inclusive.
    pub fn explore(&self, d_min: f64, d_max: f64, n_steps: usize) -> Result<ExplorationResult> {
        self.explore_with(d_min, d_max, n_steps, || false, |_| {})
    }

    /// Run the sweep with cooperative cancellation and per-trial
    /// progress reporting.
    ///
    /// `abort` is polled before each trial; once it turns true the
    /// remaining candidates are recorded with NaN slots and a single
    /// cancellation message. `progress` receives the completed fraction
    /// after each finished trial.
    pub fn explore_with(
        &self,
        d_min: f64,
        d_max: f64,
        n_steps: usize,
        abort: impl Fn() -> bool,
        progress: impl Fn(f64),
    ) -> Result<ExplorationResult> {
        let candidates = self.candidates(d_min, d_max, n_steps)?;
        let mut result = ExplorationResult::default();

        for (i, &d) in candidates.iter().enumerate() {
            if abort() {
                for &rest in &candidates[i..] {
                    result.push_cancelled(rest);
                }
                result
                    .errors
                    .push(format!("sweep cancelled after {} of {} trials", i, n_steps));
                return Ok(result);
            }
            match self.run_trial(d) {
                Ok(row) => result.push_trial(d, row),
                Err(error) => {
                    debug!("d_max sweep: trial at {} failed: {}", d, error);
                    result.push_failure(d, format!("d_max={}: {}", d, error));
                }
            }
            progress((i + 1) as f64 / n_steps as f64);
        }
        Ok(result)
    }

    /// Run the sweep on the rayon pool. Trial outputs keep the same
    /// ordering contract as the serial sweep.
    pub fn explore_parallel(
        &self,
        d_min: f64,
        d_max: f64,
        n_steps: usize,
    ) -> Result<ExplorationResult> {
        let candidates = self.candidates(d_min, d_max, n_steps)?;
        let rows: Vec<(f64, Result<TrialRow>)> = candidates
            .par_iter()
            .map(|&d| (d, self.run_trial(d)))
            .collect();

        let mut result = ExplorationResult::default();
        for (d, row) in rows {
            match row {
                Ok(row) => result.push_trial(d, row),
                Err(error) => result.push_failure(d, format!("d_max={}: {}", d, error)),
            }
        }
        Ok(result)
    }

    fn candidates(&self, d_min: f64, d_max: f64, n_steps: usize) -> Result<Vec<f64>> {
        if !(d_min > 0.0) || d_max < d_min {
            return Err(PriftError::InvalidInput(format!(
                "invalid d_max range [{}, {}]",
                d_min, d_max
            )));
        }
        if n_steps == 0 {
            return Err(PriftError::InvalidInput(
                "sweep needs at least one step".to_string(),
            ));
        }
        if n_steps == 1 {
            return Ok(vec![d_min]);
        }
        let step = (d_max - d_min) / (n_steps - 1) as f64;
        Ok((0..n_steps).map(|i| d_min + step * i as f64).collect())
    }

    fn run_trial(&self, d: f64) -> Result<TrialRow> {
        let mut trial = self.invertor.clone();
        trial.set_d_max(d)?;
        let (out, _) = trial.lstsq(self.nfunc)?;
        Ok(TrialRow {
            chi2: trial.chi2(),
            rg: trial.rg(&out),
            iq0: trial.iq0(&out),
            positive: trial.get_positive(&out),
            oscillations: trial.oscillations(&out),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basis::SineBasis;
    use ndarray::Array1;
    use std::cell::Cell;
    use std::cell::RefCell;

    fn smooth_invertor() -> Invertor {
        let d_max = 100.0;
        let basis = SineBasis::new(d_max, 2, false);
        let q = Array1::from_shape_fn(40, |i| 0.004 + 0.003 * i as f64);
        let y = q.mapv(|qi| basis.eval_q(0, qi) + 0.25 * basis.eval_q(1, qi));
        let err = y.mapv(|yi| (0.01 * yi.abs()).max(1e-6));

        let mut inv = Invertor::new();
        inv.set_d_max(d_max).unwrap();
        inv.set_alpha(1e-4).unwrap();
        inv.set_data(q, y, err).unwrap();
        inv
    }

    #[test]
    fn test_sweep_produces_aligned_rows() {
        let inv = smooth_invertor();
        let explorer = DistExplorer::new(&inv, 6);
        let result = explorer.explore(80.0, 120.0, 5).unwrap();

        assert_eq!(result.len(), 5);
        assert_eq!(result.chi2.len(), 5);
        assert_eq!(result.rg.len(), 5);
        assert_eq!(result.iq0.len(), 5);
        assert_eq!(result.positive_fraction.len(), 5);
        assert_eq!(result.oscillations.len(), 5);
        assert!(result.errors.is_empty());

        assert_eq!(result.d_max[0], 80.0);
        assert_eq!(result.d_max[4], 120.0);
        assert!(result.d_max.windows(2).all(|w| w[0] < w[1]));
        assert!(result.chi2.iter().all(|c| c.is_finite()));
    }

    #[test]
    fn test_sweep_leaves_caller_untouched() {
        let inv = smooth_invertor();
        let explorer = DistExplorer::new(&inv, 6);
        explorer.explore(80.0, 120.0, 3).unwrap();
        assert_eq!(inv.d_max(), 100.0);
        assert!(inv.result().is_none());
    }

    #[test]
    fn test_single_step_sweep_uses_lower_bound() {
        let inv = smooth_invertor();
        let explorer = DistExplorer::new(&inv, 6);
        let result = explorer.explore(90.0, 110.0, 1).unwrap();
        assert_eq!(result.d_max, vec![90.0]);
    }

    #[test]
    fn test_invalid_ranges_are_rejected() {
        let inv = smooth_invertor();
        let explorer = DistExplorer::new(&inv, 6);
        assert!(explorer.explore(0.0, 100.0, 3).is_err());
        assert!(explorer.explore(-5.0, 100.0, 3).is_err());
        assert!(explorer.explore(120.0, 80.0, 3).is_err());
        assert!(explorer.explore(80.0, 120.0, 0).is_err());
    }

    #[test]
    fn test_failed_trials_record_nan_and_message() {
        // All-zero errors make every solve fail with DegenerateWeights
        let mut inv = smooth_invertor();
        inv.set_err(Array1::zeros(40));
        let explorer = DistExplorer::new(&inv, 6);
        let result = explorer.explore(80.0, 120.0, 3).unwrap();

        assert_eq!(result.len(), 3);
        assert_eq!(result.errors.len(), 3);
        assert!(result.chi2.iter().all(|c| c.is_nan()));
        assert!(result.rg.iter().all(|c| c.is_nan()));
        assert!(result.d_max.iter().all(|d| d.is_finite()));
    }

    #[test]
    fn test_cancellation_records_remaining_trials() {
        let inv = smooth_invertor();
        let explorer = DistExplorer::new(&inv, 6);
        let polls = Cell::new(0usize);
        let reported = RefCell::new(Vec::new());

        let result = explorer
            .explore_with(
                80.0,
                120.0,
                5,
                || {
                    let n = polls.get();
                    polls.set(n + 1);
                    n >= 2
                },
                |fraction| reported.borrow_mut().push(fraction),
            )
            .unwrap();

        assert_eq!(result.len(), 5);
        assert!(result.chi2[0].is_finite());
        assert!(result.chi2[1].is_finite());
        assert!(result.chi2[2].is_nan());
        assert!(result.chi2[4].is_nan());
        assert_eq!(result.errors.len(), 1);
        assert!(result.errors[0].contains("cancelled"));
        assert_eq!(*reported.borrow(), vec![0.2, 0.4]);
    }

    #[test]
    fn test_parallel_sweep_matches_serial() {
        let inv = smooth_invertor();
        let explorer = DistExplorer::new(&inv, 6);
        let serial = explorer.explore(80.0, 120.0, 7).unwrap();
        let parallel = explorer.explore_parallel(80.0, 120.0, 7).unwrap();

        assert_eq!(serial.d_max, parallel.d_max);
        assert_eq!(serial.chi2, parallel.chi2);
        assert_eq!(serial.rg, parallel.rg);
        assert_eq!(serial.oscillations, parallel.oscillations);
        assert!(parallel.errors.is_empty());
    }

    #[test]
    fn test_default_range_brackets_current_d_max() {
        let inv = smooth_invertor();
        let explorer = DistExplorer::new(&inv, 6);
        let (lo, hi) = explorer.default_range();
        assert_eq!(lo, 80.0);
        assert_eq!(hi, 120.0);
    }
}

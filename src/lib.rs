//! # prift
//!
//! `prift` computes the pair distance distribution P(r) from small-angle
//! scattering data by regularized indirect Fourier transform.
//!
//! The library provides:
//! - A sine-series expansion of P(r) with exact reciprocal-space transforms,
//!   including slit smearing
//! - Direct regularized least-squares and derivative-free optimizer solvers
//!   with full covariance propagation
//! - Distribution diagnostics (positivity, oscillation, peak count, Rg, I(0))
//! - Hyper-parameter estimation for the regularization strength and basis size,
//!   plus a d_max explorer
//! - Background-thread execution with cooperative cancellation for interactive
//!   use
//!
//! ## Basic Usage
//!
//! ```
//! use ndarray::array;
//! use prift::Invertor;
//!
//! # fn main() -> prift::Result<()> {
//! let mut inv = Invertor::new();
//! inv.set_d_max(160.0)?;
//! inv.set_alpha(7e-4)?;
//! inv.set_data(
//!     array![0.01, 0.02, 0.03, 0.04, 0.05],
//!     array![10.0, 9.0, 7.5, 6.0, 4.5],
//!     array![0.5, 0.45, 0.4, 0.35, 0.3],
//! )?;
//!
//! let (coeffs, _cov) = inv.lstsq(4)?;
//! assert!(inv.chi2().is_finite());
//! assert!(inv.pr(&coeffs, 80.0).is_finite());
//! # Ok(())
//! # }
//! ```

// Public modules
pub mod background;
pub mod basis;
pub mod config;
pub mod dataset;
pub mod design;
pub mod error;
pub mod estimate;
pub mod explore;
pub mod invertor;
pub mod solver;

// Internal support
mod state;
mod utils;

// Re-exports for convenience
pub use background::{
    spawn, spawn_inversion, spawn_with_progress, CancelToken, Progress, TaskHandle, TaskSlot,
};
pub use config::InversionConfig;
pub use dataset::Dataset;
pub use error::{PriftError, Result};
pub use estimate::{AlphaEstimate, TermsEstimate};
pub use explore::{DistExplorer, ExplorationResult};
pub use invertor::{InversionResult, Invertor};

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smoke() {
        assert!(!VERSION.is_empty());
        let inv = Invertor::new();
        assert!(inv.d_max() > 0.0);
        assert_eq!(inv.npts(), 0);
    }
}

//! Solvers for the regularized least-squares system.
//!
//! Two paths produce coefficients for the same objective
//! `||A_w x - b_w||^2 + alpha x^T R x`:
//!
//! - [`direct`] solves the regularized normal equations in closed form and
//!   propagates the covariance; it is the fast path used by the
//!   hyper-parameter search and the Dmax explorer.
//! - [`simplex`] minimizes the objective with a derivative-free
//!   Nelder-Mead iteration that accepts a cancellation predicate, used by
//!   the abortable entry points.

pub mod direct;
pub mod simplex;

pub use direct::{solve_direct, DirectSolution};
pub use simplex::{minimize, SimplexConfig, SimplexResult};

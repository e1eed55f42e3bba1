//! objective_optimizer — argmin-powered minimization of crate objectives.
//!
//! Purpose
//! -------
//! Provide a thin, Argmin-backed optimization layer shared by every numeric
//! search in the crate: the L-BFGS inner fit of CRF parameters and the outer
//! L-BFGS search over log regularization strengths. Callers implement
//! [`Objective`] and invoke [`minimize`].
//!
//! Key behaviors
//! -------------
//! - Bridge an [`Objective`] into Argmin via [`adapter::ArgMinAdapter`], with
//!   a finite-difference gradient fallback.
//! - Build L-BFGS with a configurable line search ([`builders`]) and run it
//!   ([`run::run_lbfgs`]), reporting iterations through `tracing`
//!   ([`observer::TracingObserver`]).
//! - Provide derivative products ([`finite_diff`]) and a matrix-free
//!   conjugate-gradient solver ([`linear_solve`]) used by implicit
//!   hyperparameter gradients.
//!
//! Conventions
//! -----------
//! - The objective is a cost; nothing in this module flips signs.
//! - Errors bubble up as [`OptResult<T>`](crate::optimization::errors::OptResult);
//!   this module never intentionally panics.

pub mod adapter;
pub mod api;
pub mod builders;
pub mod finite_diff;
pub mod linear_solve;
pub mod observer;
pub mod run;
pub mod traits;
pub mod types;
pub mod validation;

// ---- Re-exports (primary public surface) ----------------------------------

pub use self::api::minimize;
pub use self::traits::{LbfgsOptions, LineSearcher, Objective, OptimOutcome, Tolerances};
pub use self::types::{Cost, DEFAULT_LBFGS_MEM, FnEvalMap, Grad, Theta};

pub mod prelude {
    pub use super::api::minimize;
    pub use super::traits::{LbfgsOptions, LineSearcher, Objective, OptimOutcome, Tolerances};
    pub use super::types::{Cost, Grad, Theta};
}

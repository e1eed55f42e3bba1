//! optimization — numerical optimization infrastructure.
//!
//! - [`objective_optimizer`]: argmin-backed L-BFGS minimization of crate
//!   objectives, finite-difference products and a conjugate-gradient solver.
//! - [`numerical_stability`]: log-domain helpers and special functions.
//! - [`errors`]: [`OptError`](errors::OptError) and its result alias.

pub mod errors;
pub mod numerical_stability;
pub mod objective_optimizer;

//! oracle — memoized batch-level objective queries.
//!
//! [`ComputationOracle`] wraps a [`Distributor`](crate::dispatch::Distributor)
//! and exposes the numeric queries the optimizers consume; [`cache`] holds
//! the single-entry memo slots and [`diagnostics`] the parameter dumps
//! written on precision failures.

pub mod cache;
pub mod computation;
pub mod diagnostics;

pub use self::computation::ComputationOracle;

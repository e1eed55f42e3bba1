//! dispatch — per-example objective commands and their batch fan-out.
//!
//! Purpose
//! -------
//! Bridge the optimizers' numeric queries and the structural inference
//! engine. A [`Request`] names one [`Command`]; the [`Dispatcher`] evaluates
//! it on a single example and the [`Distributor`] sums the results over a
//! batch of examples.
//!
//! Key behaviors
//! -------------
//! - One enum variant per operation, each carrying only its own parameters.
//! - Result shapes: corpus-sized sparse vectors, dense `[gradient…, value]`
//!   vectors, or small Gamma sufficient-statistic tuples.
//! - Gamma evidence math (log-likelihood, log-parameter gradients, MLE fit)
//!   lives in [`gamma`] and works on aggregated statistics.
//!
//! Downstream usage
//! ----------------
//! - [`crate::oracle::ComputationOracle`] wraps a [`Distributor`] with caching
//!   and exposes named queries to the training layers.

pub mod command;
pub mod dispatcher;
pub mod distribute;
pub mod errors;
pub mod gamma;

// ---- Re-exports (primary public surface) ----------------------------------

pub use self::command::{Command, ObjectiveToggles, Request};
pub use self::dispatcher::Dispatcher;
pub use self::distribute::{Distributor, Parallelism};
pub use self::errors::{DispatchError, DispatchResult};
pub use self::gamma::fit_gamma_mle;

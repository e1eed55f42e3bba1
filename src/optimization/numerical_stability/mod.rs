//! numerical_stability — log-domain arithmetic and special functions.
//!
//! Purpose
//! -------
//! Collect the numerically careful scalar helpers shared by the inference
//! engine (log-space accumulation), the evidence statistics (trigamma for
//! the Gamma shape Newton step) and the training layers (bounded
//! exponentiation of log hyperparameters, round-off clamping).
//!
//! Conventions
//! -----------
//! - `−∞` is the log-domain zero and is handled as an identity by the
//!   accumulation helpers.
//! - This module never logs, performs I/O, or touches global state.

pub mod transformations;

// ---- Re-exports (primary public surface) ----------------------------------

pub use self::transformations::{
    MAX_LOG_MAGNITUDE, ROUNDOFF_TOL, clamp_roundoff, log_add_exp, safe_exp, trigamma,
};

//! engine — the structural inference engine consumed by the dispatcher.
//!
//! Purpose
//! -------
//! Define the [`InferenceEngine`] capability set the objective layer drives:
//! load a sequence and a parameter vector, optionally clamp to a structure
//! or install a loss potential, run Viterbi / inside / outside passes, and
//! read back scores, feature counts, posteriors, decodings and
//! posterior-weighted evidence statistics.
//!
//! Key behaviors
//! -------------
//! - Every pass comes in two flavors selected by [`Pass`]: `Plain` scores
//!   structures with the CRF weights only, `Ess` adds the evidence emission
//!   log-densities prepared by `update_evidence_structures`.
//! - Scores are reported as [`Score`]; `Score::Invalid` means no structure
//!   is admissible under the current clamp.
//! - [`NussinovEngine`] is a complete reference implementation.
//!
//! Invariants & assumptions
//! ------------------------
//! - Engines are stateful and single-threaded; concurrency comes from
//!   cloning one engine per worker.
//! - Loading a sequence clears constraints, loss and evidence state; loading
//!   new values clears only the prepared evidence terms.

pub mod errors;
pub mod nussinov;

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::corpus::{Example, Structure};

pub use self::errors::{EngineError, EngineResult};
pub use self::nussinov::NussinovEngine;

/// Which potentials a pass includes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pass {
    /// CRF weights only.
    Plain,
    /// CRF weights plus evidence emission log-densities.
    Ess,
}

/// Log-domain score of a pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Score {
    /// No admissible structure (e.g. the clamp cannot be parsed).
    Invalid,
    Valid(f64),
}

impl Score {
    /// `Valid(x)` for finite `x`, `Invalid` otherwise.
    pub fn from_log(x: f64) -> Self {
        if x.is_finite() { Score::Valid(x) } else { Score::Invalid }
    }

    pub fn value(self) -> Option<f64> {
        match self {
            Score::Valid(x) => Some(x),
            Score::Invalid => None,
        }
    }

    pub fn is_valid(self) -> bool {
        matches!(self, Score::Valid(_))
    }
}

/// Structure decoder used for predictions and holdout losses.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Decoding {
    /// Highest-scoring structure.
    Viterbi,
    /// Maximum expected accuracy with pair gain `gain`.
    MaxExpectedAccuracy { gain: f64 },
    /// γ-centroid estimator.
    Centroid { gain: f64 },
}

impl Decoding {
    pub fn gain(self) -> Option<f64> {
        match self {
            Decoding::Viterbi => None,
            Decoding::MaxExpectedAccuracy { gain } | Decoding::Centroid { gain } => Some(gain),
        }
    }

    pub fn needs_posteriors(self) -> bool {
        !matches!(self, Decoding::Viterbi)
    }
}

/// Posterior-weighted Gamma sufficient statistics: `(Σ w·d, Σ w·ln d, Σ w)`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GammaCounts {
    pub sum: f64,
    pub sum_log: f64,
    pub count: f64,
}

/// Structural inference over one sequence at a time.
pub trait InferenceEngine: Clone + Send + Sync {
    /// Number of structural features (the leading block of the parameter vector).
    fn num_structural_features(&self) -> usize;

    // ---- Setup ----
    fn load_sequence(&mut self, example: &Example) -> EngineResult<()>;
    fn load_values(&mut self, values: &Array1<f64>) -> EngineResult<()>;
    fn use_constraints(&mut self, structure: &Structure) -> EngineResult<()>;
    fn clear_constraints(&mut self);
    /// Add `per_position` for every position whose assignment disagrees with `truth`.
    fn use_loss(&mut self, truth: &Structure, per_position: f64) -> EngineResult<()>;
    fn clear_loss(&mut self);
    /// Recompute evidence emission terms from the loaded sequence and values.
    fn update_evidence_structures(&mut self) -> EngineResult<()>;

    // ---- Passes ----
    fn compute_viterbi(&mut self, pass: Pass) -> EngineResult<()>;
    fn compute_inside(&mut self, pass: Pass) -> EngineResult<()>;
    fn compute_outside(&mut self, pass: Pass) -> EngineResult<()>;

    // ---- Results ----
    fn viterbi_score(&self) -> Score;
    fn log_partition(&self) -> Score;
    fn viterbi_features(&self) -> EngineResult<Array1<f64>>;
    fn feature_expectations(&self) -> EngineResult<Array1<f64>>;
    fn pair_posteriors(&self) -> EngineResult<Array2<f64>>;

    // ---- Decoding ----
    fn predict_viterbi(&self) -> EngineResult<Structure>;
    fn predict_posterior(&self, gain: f64) -> EngineResult<Structure>;
    fn predict_centroid(&self, gain: f64) -> EngineResult<Structure>;

    // ---- Evidence ----
    /// Gamma statistics of `(channel, source)` observations, weighted by the
    /// marginal probability of `state` under the last Viterbi or outside
    /// pass (`state = None` weighs every observation by one).
    fn gamma_counts(
        &self, channel: usize, source: usize, state: Option<usize>, exclude_zeros: bool,
    ) -> EngineResult<GammaCounts>;
}

//! training — inner weight fits and the outer hyperparameter search.
//!
//! Purpose
//! -------
//! Drive the [`ComputationOracle`](crate::oracle::ComputationOracle) with
//! nested optimizers: an inner strategy fits the CRF weights for fixed
//! regularization strengths, and the outer search tunes the log strengths
//! against a holdout set.
//!
//! Key behaviors
//! -------------
//! - Inner strategies implement [`InnerOptimizer`]: [`LbfgsInner`] (full
//!   L-BFGS), [`SgdInner`] (mini-batch SGD on the evidence-augmented
//!   objective) and [`EmInner`] (single gradient/EM iterations composed from
//!   [`StructuralUpdate`] and [`EvidenceUpdate`] strategies).
//! - [`HyperparameterSearch`] is itself an optimizer
//!   [`Objective`](crate::optimization::objective_optimizer::Objective) over
//!   `log_C`, with implicit or finite-difference gradients.
//! - [`TrainingOptions`] describes a complete run and loads from JSON;
//!   [`pipeline::train`] wires everything together.
//!
//! Conventions
//! -----------
//! - Regularization strengths are given per group and are always positive;
//!   evidence parameters are not regularized.
//! - Errors from callbacks run inside argmin are parked and returned as the
//!   original [`TrainError`] variant.

pub mod em;
pub mod errors;
pub mod inner;
pub mod options;
pub mod outer;
pub mod pipeline;
pub mod sgd;

// ---- Re-exports (primary public surface) ----------------------------------

pub use self::em::{
    EmInner, EvidenceUpdate, GammaEvidenceUpdate, GradientEmStep, NoEvidence, StructuralUpdate,
};
pub use self::errors::{TrainError, TrainResult};
pub use self::inner::{InnerOptimizer, InnerSolution, LbfgsInner};
pub use self::options::{
    EmOptions, InnerStrategy, LbfgsConfig, OuterGradient, OuterOptions, SgdOptions, TrainingOptions,
};
pub use self::outer::{HyperparameterSearch, OuterSolution};
pub use self::sgd::SgdInner;

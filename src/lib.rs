//! rust_foldtrain — objective oracle and bilevel optimization for training
//! CRF models of RNA secondary structure.
//!
//! Purpose
//! -------
//! Evaluate CRF training objectives, gradients and evidence statistics over a
//! corpus of sequences, and drive nested optimizers over them: inner fits of
//! the model weights for fixed regularization, and an outer quasi-Newton
//! search over log regularization strengths scored on a holdout set.
//!
//! Key behaviors
//! -------------
//! - [`engine`]: the [`InferenceEngine`](engine::InferenceEngine) capability
//!   set plus a reference log-domain Nussinov engine.
//! - [`dispatch`]: one tagged [`Command`](dispatch::Command) per operation,
//!   evaluated per example and summed over batches with rayon.
//! - [`oracle`]: memoized batch queries with diagnostic dumps on precision
//!   failures.
//! - [`training`]: L-BFGS, SGD and EM inner strategies and the outer search.
//! - [`optimization`]: the argmin-backed L-BFGS layer, finite differences,
//!   conjugate gradient and numerical helpers.
//! - [`corpus`]: examples, structures, parameter layout and output writers.
//!
//! Invariants & assumptions
//! ------------------------
//! - Objectives are costs: the structural objective is non-negative per
//!   example up to roundoff, and every optimizer minimizes.
//! - Sums over examples are reduced in unit order, so results do not depend
//!   on the thread schedule.
//!
//! Conventions
//! -----------
//! - Each module area has its own error enum and `XResult<T>` alias; nothing
//!   panics on invalid input.
//! - Logging goes through `tracing`; [`telemetry::init_tracing`] installs a
//!   `RUST_LOG`-filtered subscriber.

pub mod corpus;
pub mod dispatch;
pub mod engine;
pub mod optimization;
pub mod oracle;
pub mod telemetry;
pub mod training;

pub mod prelude {
    pub use crate::corpus::{Corpus, EvidenceCell, EvidenceTrack, Example, ParameterLayout, Structure};
    pub use crate::dispatch::{Command, DispatchError, Distributor, ObjectiveToggles, Parallelism};
    pub use crate::engine::{Decoding, InferenceEngine, NussinovEngine};
    pub use crate::oracle::ComputationOracle;
    pub use crate::training::{
        HyperparameterSearch, InnerOptimizer, TrainError, TrainingOptions, pipeline::train,
    };
}

//! Command requests understood by the dispatcher.
//!
//! A [`Request`] is broadcast unchanged to every example of a batch; the
//! [`Command`] variant selects the objective and carries exactly the
//! parameters that objective needs.
use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::{
    corpus::{EvidenceCell, PredictOutputs},
    dispatch::errors::{DispatchError, DispatchResult},
    engine::Decoding,
};

/// Objective switches shared by the structural objectives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ObjectiveToggles {
    /// Max-margin (Viterbi) objective instead of the log-partition one.
    pub nonsmooth: bool,
    /// Add a per-position Hamming loss against the ground truth.
    pub use_loss: bool,
}

impl ObjectiveToggles {
    pub fn smooth() -> Self {
        Self { nonsmooth: false, use_loss: false }
    }
}

/// One per-example operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Whether the example admits any structure (consistent with its truth).
    CheckParsability,
    /// Per-example term of the bound on the optimal parameter norm.
    SolutionNormBound { use_loss: bool },
    /// Per-example L1 bound on the subgradient norm.
    GradientNormBound,
    /// Decoding loss of the current model against the ground truth.
    Loss { weights: Array1<f64>, decoding: Decoding },
    /// Structural objective and gradient.
    FunctionGradient { weights: Array1<f64>, toggles: ObjectiveToggles },
    /// EM M-step objective: expected statistics stand in for unknown truths.
    EmFunctionGradient { weights: Array1<f64>, toggles: ObjectiveToggles },
    /// Gamma sufficient statistics and log-likelihood of one evidence cell.
    GammaMle { weights: Array1<f64>, cell: EvidenceCell, scale: f64 },
    /// Un-rebased `(Σd, N)` of one evidence cell.
    GammaScalingFactor { weights: Array1<f64>, cell: EvidenceCell },
    /// Whether the example has zero-valued observations for `(channel, source)`.
    FindZeros { channel: usize, source: usize },
    /// Evidence-augmented objective and gradient.
    FunctionGradientSe { weights: Array1<f64>, toggles: ObjectiveToggles, hyperparam_data: f64 },
    /// Central-difference product of the objective Hessian with `direction`.
    HessianVectorProduct { weights: Array1<f64>, direction: Array1<f64>, toggles: ObjectiveToggles },
    /// Decode and write prediction artifacts.
    Predict { weights: Array1<f64>, decoding: Decoding, outputs: PredictOutputs },
}

/// Number of values in one gamma statistics result: `(Σd, Σlog d, N, loglik)`.
pub const GAMMA_STATS_LEN: usize = 4;
/// Number of values in one scaling-factor result: `(Σd, N)`.
pub const SCALING_FACTOR_LEN: usize = 2;

impl Command {
    /// Length of the per-example result vector.
    ///
    /// Sparse commands are sized to the corpus, dense objectives to the
    /// parameter dimension plus one trailing value.
    pub fn result_len(&self, corpus_len: usize, dim: usize) -> usize {
        match self {
            Command::CheckParsability
            | Command::SolutionNormBound { .. }
            | Command::GradientNormBound
            | Command::Loss { .. }
            | Command::FindZeros { .. } => corpus_len,
            Command::FunctionGradient { .. }
            | Command::EmFunctionGradient { .. }
            | Command::FunctionGradientSe { .. } => dim + 1,
            Command::HessianVectorProduct { .. } => dim,
            Command::GammaMle { .. } => GAMMA_STATS_LEN,
            Command::GammaScalingFactor { .. } => SCALING_FACTOR_LEN,
            Command::Predict { .. } => 0,
        }
    }

    /// Short name used in log events.
    pub fn name(&self) -> &'static str {
        match self {
            Command::CheckParsability => "check_parsability",
            Command::SolutionNormBound { .. } => "solution_norm_bound",
            Command::GradientNormBound => "gradient_norm_bound",
            Command::Loss { .. } => "loss",
            Command::FunctionGradient { .. } => "function_gradient",
            Command::EmFunctionGradient { .. } => "em_function_gradient",
            Command::GammaMle { .. } => "gamma_mle",
            Command::GammaScalingFactor { .. } => "gamma_scaling_factor",
            Command::FindZeros { .. } => "find_zeros",
            Command::FunctionGradientSe { .. } => "function_gradient_se",
            Command::HessianVectorProduct { .. } => "hessian_vector_product",
            Command::Predict { .. } => "predict",
        }
    }
}

/// A command together with the log-domain rescaling factor.
///
/// Structural weights are multiplied by `log_base` before they reach the
/// engine and objective values are divided by it afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub log_base: f64,
    pub command: Command,
}

impl Request {
    /// # Errors
    /// [`DispatchError::InvalidLogBase`] unless `log_base` is finite and positive.
    pub fn new(log_base: f64, command: Command) -> DispatchResult<Self> {
        if !(log_base.is_finite() && log_base > 0.0) {
            return Err(DispatchError::InvalidLogBase { value: log_base });
        }
        Ok(Self { log_base, command })
    }

    /// Request at `log_base = 1`.
    pub fn unscaled(command: Command) -> Self {
        Self { log_base: 1.0, command }
    }
}

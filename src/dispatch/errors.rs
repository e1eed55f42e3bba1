use ndarray::Array1;

use crate::{corpus::CorpusError, engine::EngineError, optimization::errors::OptError};

/// Result alias for per-example objective evaluation.
pub type DispatchResult<T> = Result<T, DispatchError>;

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchError {
    // ---- Configuration ----
    /// Hessian-vector products need a differentiable (smooth) objective.
    NonsmoothHessian,

    /// The command needs a ground-truth structure the example does not have.
    MissingGroundTruth {
        example: String,
    },

    /// `log_base` must be finite and strictly positive.
    InvalidLogBase {
        value: f64,
    },

    /// Hyperparameter weight for unsupervised examples must be finite and non-negative.
    InvalidHyperparamData {
        value: f64,
    },

    /// Evidence data scale must be finite and strictly positive.
    InvalidDataScale {
        value: f64,
    },

    /// Regularization strengths must be finite and strictly positive.
    InvalidRegularization {
        value: f64,
    },

    // ---- Numerical ----
    /// Conditional score exceeded the unconditional score.
    InvariantViolation {
        example: String,
        unconditional: f64,
        conditional: f64,
    },

    /// Per-example objective is negative beyond roundoff.
    PrecisionViolation {
        example: String,
        value: f64,
        params: Array1<f64>,
    },

    // ---- Collaborators ----
    Engine(EngineError),
    Corpus(CorpusError),
    Optimization(OptError),
}

impl std::error::Error for DispatchError {}

impl std::fmt::Display for DispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            // ---- Configuration ----
            DispatchError::NonsmoothHessian => {
                write!(f, "Hessian-vector products are undefined for the non-smooth objective")
            }
            DispatchError::MissingGroundTruth { example } => {
                write!(f, "Example '{example}' has no ground-truth structure")
            }
            DispatchError::InvalidLogBase { value } => {
                write!(f, "Invalid log base {value}: must be finite and > 0")
            }
            DispatchError::InvalidHyperparamData { value } => {
                write!(f, "Invalid unsupervised-example weight {value}: must be finite and >= 0")
            }
            DispatchError::InvalidDataScale { value } => {
                write!(f, "Invalid evidence data scale {value}: must be finite and > 0")
            }
            DispatchError::InvalidRegularization { value } => {
                write!(f, "Invalid regularization strength {value}: must be finite and > 0")
            }

            // ---- Numerical ----
            DispatchError::InvariantViolation { example, unconditional, conditional } => {
                write!(
                    f,
                    "Conditional score {conditional} exceeds unconditional score {unconditional} \
                     for example '{example}'"
                )
            }
            DispatchError::PrecisionViolation { example, value, .. } => {
                write!(f, "Negative objective {value} for example '{example}' beyond roundoff")
            }

            // ---- Collaborators ----
            DispatchError::Engine(err) => write!(f, "Inference engine error: {err}"),
            DispatchError::Corpus(err) => write!(f, "Corpus error: {err}"),
            DispatchError::Optimization(err) => write!(f, "Optimization error: {err}"),
        }
    }
}

impl From<EngineError> for DispatchError {
    fn from(err: EngineError) -> Self {
        DispatchError::Engine(err)
    }
}

impl From<CorpusError> for DispatchError {
    fn from(err: CorpusError) -> Self {
        DispatchError::Corpus(err)
    }
}

impl From<OptError> for DispatchError {
    fn from(err: OptError) -> Self {
        DispatchError::Optimization(err)
    }
}

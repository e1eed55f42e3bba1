use crate::{corpus::CorpusError, dispatch::DispatchError, optimization::errors::OptError};

/// Result alias for inner and outer training runs.
pub type TrainResult<T> = Result<T, TrainError>;

#[derive(Debug, Clone, PartialEq)]
pub enum TrainError {
    // ---- Configuration ----
    /// An option failed validation.
    InvalidOptions {
        field: &'static str,
        reason: &'static str,
    },

    /// Options file could not be parsed.
    MalformedOptions {
        text: String,
    },

    /// The requested operation is not available for this strategy.
    NotImplemented {
        operation: &'static str,
    },

    /// The implicit outer gradient needs an inner strategy that minimizes
    /// the regularized standard objective.
    ImplicitGradientUnsupported {
        strategy: &'static str,
    },

    /// A training or holdout set has no usable examples.
    EmptyUnits {
        set: &'static str,
    },

    // ---- Collaborators ----
    Dispatch(DispatchError),
    Corpus(CorpusError),
    Optimization(OptError),
}

impl std::error::Error for TrainError {}

impl std::fmt::Display for TrainError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            // ---- Configuration ----
            TrainError::InvalidOptions { field, reason } => {
                write!(f, "Invalid option '{field}': {reason}")
            }
            TrainError::MalformedOptions { text } => {
                write!(f, "Could not parse training options: {text}")
            }
            TrainError::NotImplemented { operation } => {
                write!(f, "Operation '{operation}' is not implemented")
            }
            TrainError::ImplicitGradientUnsupported { strategy } => {
                write!(
                    f,
                    "Implicit hyperparameter gradients need the L-BFGS inner strategy, got '{strategy}'"
                )
            }
            TrainError::EmptyUnits { set } => write!(f, "The {set} set has no usable examples"),

            // ---- Collaborators ----
            TrainError::Dispatch(err) => write!(f, "Objective evaluation failed: {err}"),
            TrainError::Corpus(err) => write!(f, "Corpus error: {err}"),
            TrainError::Optimization(err) => write!(f, "Optimization error: {err}"),
        }
    }
}

impl From<DispatchError> for TrainError {
    fn from(err: DispatchError) -> Self {
        TrainError::Dispatch(err)
    }
}

impl From<CorpusError> for TrainError {
    fn from(err: CorpusError) -> Self {
        TrainError::Corpus(err)
    }
}

impl From<OptError> for TrainError {
    fn from(err: OptError) -> Self {
        TrainError::Optimization(err)
    }
}

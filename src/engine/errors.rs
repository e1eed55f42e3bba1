use crate::corpus::CorpusError;

/// Result alias for inference-engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Clone, PartialEq)]
pub enum EngineError {
    /// A pass or setup call was issued before `load_sequence`.
    SequenceNotLoaded,

    /// A pass was issued before `load_values`.
    ValuesNotLoaded,

    /// The loaded parameter vector has the wrong length.
    ParameterDimMismatch {
        expected: usize,
        found: usize,
    },

    /// Constraint or loss reference structure has the wrong length.
    StructureLengthMismatch {
        expected: usize,
        found: usize,
    },

    /// An evidence pass was requested before `update_evidence_structures`.
    EvidenceNotPrepared,

    /// Gamma emission parameters are not usable (non-finite or non-positive).
    InvalidGammaParameters {
        shape: f64,
        scale: f64,
    },

    /// Loss scale must be finite.
    InvalidLossScale {
        value: f64,
    },

    /// Posterior quantities were requested before an outside pass.
    PosteriorsNotComputed,

    /// A decoding was requested but no structure is admissible.
    NoAdmissibleStructure,

    /// Layout lookup failed.
    Corpus(CorpusError),
}

impl std::error::Error for EngineError {}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::SequenceNotLoaded => write!(f, "No sequence loaded into the engine"),
            EngineError::ValuesNotLoaded => write!(f, "No parameter values loaded into the engine"),
            EngineError::ParameterDimMismatch { expected, found } => {
                write!(f, "Parameter dimension mismatch: expected {expected}, found {found}")
            }
            EngineError::StructureLengthMismatch { expected, found } => {
                write!(f, "Structure length mismatch: expected {expected}, found {found}")
            }
            EngineError::EvidenceNotPrepared => {
                write!(f, "Evidence pass requested before evidence structures were updated")
            }
            EngineError::InvalidGammaParameters { shape, scale } => {
                write!(f, "Invalid Gamma parameters: shape {shape}, scale {scale}")
            }
            EngineError::InvalidLossScale { value } => {
                write!(f, "Invalid loss scale {value}: must be finite")
            }
            EngineError::PosteriorsNotComputed => {
                write!(f, "Posteriors requested before an outside pass")
            }
            EngineError::NoAdmissibleStructure => {
                write!(f, "No admissible structure under the current constraints")
            }
            EngineError::Corpus(err) => write!(f, "Layout error: {err}"),
        }
    }
}

impl From<CorpusError> for EngineError {
    fn from(err: CorpusError) -> Self {
        EngineError::Corpus(err)
    }
}

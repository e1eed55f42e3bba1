/// Result alias for corpus, structure and layout operations.
pub type CorpusResult<T> = Result<T, CorpusError>;

#[derive(Debug, Clone, PartialEq)]
pub enum CorpusError {
    // ---- Sequence ----
    /// Sequence must contain at least one position.
    EmptySequence {
        name: String,
    },

    /// Example weight must be finite and non-negative.
    InvalidWeight {
        name: String,
        value: f64,
    },

    // ---- Structure ----
    /// Structure length does not match the sequence length.
    StructureLengthMismatch {
        expected: usize,
        found: usize,
    },

    /// Partner mapping is not symmetric or points out of range.
    InvalidPairing {
        position: usize,
        reason: &'static str,
    },

    /// Two pairs cross each other.
    CrossingPairs {
        first: (usize, usize),
        second: (usize, usize),
    },

    /// Dot-bracket string has an unmatched bracket or an unknown symbol.
    MalformedDotBracket {
        position: usize,
        symbol: char,
    },

    // ---- Evidence ----
    /// Evidence track length does not match the sequence length.
    EvidenceLengthMismatch {
        name: String,
        channel: usize,
        expected: usize,
        found: usize,
    },

    /// Evidence observations must be finite and non-negative.
    InvalidObservation {
        name: String,
        position: usize,
        value: f64,
    },

    // ---- Corpus / layout ----
    /// Example index outside the corpus.
    ExampleOutOfRange {
        index: usize,
        len: usize,
    },

    /// A track references a channel or source the layout does not know.
    UnknownEvidenceCell {
        channel: usize,
        source: usize,
    },

    /// Regularization group assignment is inconsistent.
    InvalidGroups {
        reason: &'static str,
    },

    /// Parameter or hyperparameter vector has the wrong length.
    DimensionMismatch {
        expected: usize,
        found: usize,
    },

    // ---- Output ----
    /// A single-file destination cannot receive several examples.
    SingleFileDestination {
        requested: usize,
    },

    /// Filesystem failure while writing an artifact.
    Io {
        path: String,
        text: String,
    },
}

impl std::error::Error for CorpusError {}

impl std::fmt::Display for CorpusError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            // ---- Sequence ----
            CorpusError::EmptySequence { name } => {
                write!(f, "Example '{name}' has an empty sequence")
            }
            CorpusError::InvalidWeight { name, value } => {
                write!(f, "Example '{name}' has invalid weight {value}: must be finite and >= 0")
            }

            // ---- Structure ----
            CorpusError::StructureLengthMismatch { expected, found } => {
                write!(f, "Structure length mismatch: expected {expected}, found {found}")
            }
            CorpusError::InvalidPairing { position, reason } => {
                write!(f, "Invalid pairing at position {position}: {reason}")
            }
            CorpusError::CrossingPairs { first, second } => {
                write!(f, "Pairs {first:?} and {second:?} cross")
            }
            CorpusError::MalformedDotBracket { position, symbol } => {
                write!(f, "Malformed dot-bracket string at position {position}: '{symbol}'")
            }

            // ---- Evidence ----
            CorpusError::EvidenceLengthMismatch { name, channel, expected, found } => {
                write!(
                    f,
                    "Example '{name}' channel {channel}: evidence length {found}, expected {expected}"
                )
            }
            CorpusError::InvalidObservation { name, position, value } => {
                write!(
                    f,
                    "Example '{name}' position {position}: observation {value} must be finite and >= 0"
                )
            }

            // ---- Corpus / layout ----
            CorpusError::ExampleOutOfRange { index, len } => {
                write!(f, "Example index {index} out of range for corpus of {len}")
            }
            CorpusError::UnknownEvidenceCell { channel, source } => {
                write!(f, "No evidence parameters for channel {channel}, source {source}")
            }
            CorpusError::InvalidGroups { reason } => {
                write!(f, "Invalid regularization groups: {reason}")
            }
            CorpusError::DimensionMismatch { expected, found } => {
                write!(f, "Dimension mismatch: expected {expected}, found {found}")
            }

            // ---- Output ----
            CorpusError::SingleFileDestination { requested } => {
                write!(f, "Single-file destination cannot hold {requested} examples")
            }
            CorpusError::Io { path, text } => {
                write!(f, "I/O error at '{path}': {text}")
            }
        }
    }
}

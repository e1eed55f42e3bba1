//! Training examples and the immutable corpus they live in.
use std::sync::Arc;

use crate::corpus::{
    errors::{CorpusError, CorpusResult},
    structure::Structure,
};

/// One channel of per-position experimental evidence.
///
/// `values[i]` is the observation at position `i`, `None` when missing.
/// Observations are non-negative; exact zeros are legal and handled by the
/// zero-excluding statistics of the Gamma evidence model.
#[derive(Debug, Clone, PartialEq)]
pub struct EvidenceTrack {
    pub channel: usize,
    pub source: usize,
    pub values: Vec<Option<f64>>,
}

impl EvidenceTrack {
    pub fn new(channel: usize, source: usize, values: Vec<Option<f64>>) -> Self {
        Self { channel, source, values }
    }

    pub fn has_zeros(&self) -> bool {
        self.values.iter().any(|v| *v == Some(0.0))
    }
}

/// A single training or prediction example.
#[derive(Debug, Clone, PartialEq)]
pub struct Example {
    name: String,
    sequence: String,
    truth: Option<Structure>,
    evidence: Vec<EvidenceTrack>,
    weight: f64,
}

impl Example {
    /// Build a validated example.
    ///
    /// # Errors
    /// - [`CorpusError::EmptySequence`] for an empty sequence.
    /// - [`CorpusError::InvalidWeight`] for a negative or non-finite weight.
    /// - [`CorpusError::StructureLengthMismatch`] if `truth` has the wrong length.
    /// - [`CorpusError::EvidenceLengthMismatch`] / [`CorpusError::InvalidObservation`]
    ///   for malformed evidence tracks.
    pub fn new(
        name: impl Into<String>, sequence: impl Into<String>, truth: Option<Structure>,
        evidence: Vec<EvidenceTrack>, weight: f64,
    ) -> CorpusResult<Self> {
        let name = name.into();
        let sequence = sequence.into();
        let n = sequence.chars().count();
        if n == 0 {
            return Err(CorpusError::EmptySequence { name });
        }
        if !(weight.is_finite() && weight >= 0.0) {
            return Err(CorpusError::InvalidWeight { name, value: weight });
        }
        if let Some(s) = &truth {
            if s.len() != n {
                return Err(CorpusError::StructureLengthMismatch { expected: n, found: s.len() });
            }
        }
        for track in &evidence {
            if track.values.len() != n {
                return Err(CorpusError::EvidenceLengthMismatch {
                    name,
                    channel: track.channel,
                    expected: n,
                    found: track.values.len(),
                });
            }
            for (position, value) in track.values.iter().enumerate() {
                if let Some(v) = *value {
                    if !(v.is_finite() && v >= 0.0) {
                        return Err(CorpusError::InvalidObservation { name, position, value: v });
                    }
                }
            }
        }
        Ok(Self { name, sequence, truth, evidence, weight })
    }

    /// Unit-weight example with a known structure and no evidence.
    pub fn supervised(
        name: impl Into<String>, sequence: impl Into<String>, truth: Structure,
    ) -> CorpusResult<Self> {
        Self::new(name, sequence, Some(truth), Vec::new(), 1.0)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn sequence(&self) -> &str {
        &self.sequence
    }

    pub fn len(&self) -> usize {
        self.sequence.chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.sequence.is_empty()
    }

    pub fn truth(&self) -> Option<&Structure> {
        self.truth.as_ref()
    }

    pub fn evidence(&self) -> &[EvidenceTrack] {
        &self.evidence
    }

    pub fn weight(&self) -> f64 {
        self.weight
    }

    /// Tracks recorded for a `(channel, source)` pair.
    pub fn tracks(&self, channel: usize, source: usize) -> impl Iterator<Item = &EvidenceTrack> {
        self.evidence.iter().filter(move |t| t.channel == channel && t.source == source)
    }

    /// Whether any observation of `(channel, source)` is exactly zero.
    pub fn has_zero_evidence(&self, channel: usize, source: usize) -> bool {
        self.tracks(channel, source).any(EvidenceTrack::has_zeros)
    }
}

/// Immutable, shareable training corpus. Example indices are stable.
#[derive(Debug, Clone, Default)]
pub struct Corpus {
    examples: Arc<Vec<Example>>,
}

impl Corpus {
    pub fn new(examples: Vec<Example>) -> Self {
        Self { examples: Arc::new(examples) }
    }

    pub fn len(&self) -> usize {
        self.examples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.examples.is_empty()
    }

    /// # Errors
    /// [`CorpusError::ExampleOutOfRange`] if `index >= len()`.
    pub fn get(&self, index: usize) -> CorpusResult<&Example> {
        self.examples
            .get(index)
            .ok_or(CorpusError::ExampleOutOfRange { index, len: self.examples.len() })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Example> {
        self.examples.iter()
    }

    /// All example indices in order.
    pub fn all_units(&self) -> Vec<usize> {
        (0..self.examples.len()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // -------------------------------------------------------------------------
    // Scope
    // -----
    // These tests cover example validation and zero detection in evidence.
    // -------------------------------------------------------------------------

    #[test]
    // Purpose
    // -------
    // Reject malformed examples at construction.
    //
    // Given
    // -----
    // - An empty sequence, a negative weight and a short evidence track.
    //
    // Expect
    // ------
    // - The matching `CorpusError` variant for each.
    fn example_new_validates_inputs() {
        assert!(matches!(
            Example::new("e", "", None, Vec::new(), 1.0),
            Err(CorpusError::EmptySequence { .. })
        ));
        assert!(matches!(
            Example::new("w", "ACGU", None, Vec::new(), -1.0),
            Err(CorpusError::InvalidWeight { .. })
        ));
        let short = EvidenceTrack::new(0, 0, vec![Some(1.0); 3]);
        assert!(matches!(
            Example::new("t", "ACGU", None, vec![short], 1.0),
            Err(CorpusError::EvidenceLengthMismatch { expected: 4, found: 3, .. })
        ));
    }

    #[test]
    // Purpose
    // -------
    // Zero detection is scoped to the requested channel and source.
    //
    // Given
    // -----
    // - Channel 0 with a zero observation and channel 1 without.
    //
    // Expect
    // ------
    // - Zeros reported for (0, 0) only.
    fn has_zero_evidence_is_scoped_to_channel_and_source() {
        // Arrange
        let tracks = vec![
            EvidenceTrack::new(0, 0, vec![Some(0.0), Some(1.0), None]),
            EvidenceTrack::new(1, 0, vec![Some(2.0), None, Some(0.5)]),
        ];

        // Act
        let ex = Example::new("z", "ACG", None, tracks, 1.0).expect("valid example");

        // Assert
        assert!(ex.has_zero_evidence(0, 0));
        assert!(!ex.has_zero_evidence(1, 0));
        assert!(!ex.has_zero_evidence(0, 1));
    }
}

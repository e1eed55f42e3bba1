//! Secondary-structure annotations as symmetric, non-crossing partner maps.
use crate::corpus::errors::{CorpusError, CorpusResult};

/// Per-position partner mapping: `partners[i] == Some(j)` iff `i` pairs with `j`.
///
/// Invariants (checked by [`Structure::new`]): the map is symmetric, no
/// position pairs with itself, and no two pairs cross (`i < k < j < l`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Structure {
    partners: Vec<Option<usize>>,
}

impl Structure {
    /// Validate and wrap a partner mapping.
    ///
    /// # Errors
    /// - [`CorpusError::InvalidPairing`] for out-of-range, self or asymmetric pairs.
    /// - [`CorpusError::CrossingPairs`] if two pairs cross.
    pub fn new(partners: Vec<Option<usize>>) -> CorpusResult<Self> {
        let n = partners.len();
        for (i, partner) in partners.iter().enumerate() {
            if let Some(j) = *partner {
                if j >= n {
                    return Err(CorpusError::InvalidPairing {
                        position: i,
                        reason: "partner index out of range",
                    });
                }
                if j == i {
                    return Err(CorpusError::InvalidPairing {
                        position: i,
                        reason: "position paired with itself",
                    });
                }
                if partners[j] != Some(i) {
                    return Err(CorpusError::InvalidPairing {
                        position: i,
                        reason: "pairing is not symmetric",
                    });
                }
            }
        }
        let mut open: Vec<usize> = Vec::new();
        for (i, partner) in partners.iter().enumerate() {
            match *partner {
                Some(j) if j > i => open.push(i),
                Some(j) => match open.pop() {
                    Some(top) if top == j => {}
                    Some(top) => {
                        return Err(CorpusError::CrossingPairs {
                            first: (top, partners[top].unwrap_or(top)),
                            second: (j, i),
                        });
                    }
                    None => {
                        return Err(CorpusError::InvalidPairing {
                            position: i,
                            reason: "closing pair without an opening partner",
                        });
                    }
                },
                None => {}
            }
        }
        Ok(Self { partners })
    }

    /// Wrap a partner map produced by a grammar traceback, which is valid by
    /// construction.
    pub(crate) fn from_valid_partners(partners: Vec<Option<usize>>) -> Self {
        debug_assert!(Structure::new(partners.clone()).is_ok());
        Self { partners }
    }

    /// The all-unpaired structure of length `n`.
    pub fn unpaired(n: usize) -> Self {
        Self { partners: vec![None; n] }
    }

    /// Parse dot-bracket notation: `(` and `)` pair, `.` is unpaired.
    ///
    /// # Errors
    /// [`CorpusError::MalformedDotBracket`] for unknown symbols or unmatched brackets.
    pub fn from_dot_bracket(text: &str) -> CorpusResult<Self> {
        let symbols: Vec<char> = text.chars().collect();
        let mut partners = vec![None; symbols.len()];
        let mut open: Vec<usize> = Vec::new();
        for (i, &symbol) in symbols.iter().enumerate() {
            match symbol {
                '(' => open.push(i),
                ')' => {
                    let j = open
                        .pop()
                        .ok_or(CorpusError::MalformedDotBracket { position: i, symbol })?;
                    partners[i] = Some(j);
                    partners[j] = Some(i);
                }
                '.' => {}
                _ => return Err(CorpusError::MalformedDotBracket { position: i, symbol }),
            }
        }
        if let Some(&i) = open.last() {
            return Err(CorpusError::MalformedDotBracket { position: i, symbol: '(' });
        }
        Ok(Self { partners })
    }

    pub fn to_dot_bracket(&self) -> String {
        self.partners
            .iter()
            .enumerate()
            .map(|(i, partner)| match *partner {
                Some(j) if j > i => '(',
                Some(_) => ')',
                None => '.',
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.partners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partners.is_empty()
    }

    pub fn partner(&self, i: usize) -> Option<usize> {
        self.partners.get(i).copied().flatten()
    }

    pub fn partners(&self) -> &[Option<usize>] {
        &self.partners
    }

    /// Base pairs `(i, j)` with `i < j`, in increasing `i`.
    pub fn pairs(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.partners
            .iter()
            .enumerate()
            .filter_map(|(i, partner)| partner.filter(|&j| j > i).map(|j| (i, j)))
    }

    /// Number of positions whose partner assignment differs from `other`.
    ///
    /// # Errors
    /// [`CorpusError::StructureLengthMismatch`] if the lengths differ.
    pub fn position_mismatches(&self, other: &Structure) -> CorpusResult<usize> {
        if self.len() != other.len() {
            return Err(CorpusError::StructureLengthMismatch {
                expected: self.len(),
                found: other.len(),
            });
        }
        Ok(self.partners.iter().zip(&other.partners).filter(|(a, b)| a != b).count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // -------------------------------------------------------------------------
    // Scope
    // -----
    // These tests cover dot-bracket parsing and rendering, and the structural
    // invariants enforced by `Structure::new`.
    // -------------------------------------------------------------------------

    #[test]
    // Purpose
    // -------
    // Parse nested brackets into a symmetric partner map and render them back.
    //
    // Given
    // -----
    // - "((..)).".
    //
    // Expect
    // ------
    // - Pairs (0,5) and (1,4); rendering reproduces the input.
    fn dot_bracket_parses_nested_pairs() {
        // Act
        let s = Structure::from_dot_bracket("((..)).").expect("valid dot-bracket");

        // Assert
        assert_eq!(s.pairs().collect::<Vec<_>>(), vec![(0, 5), (1, 4)]);
        assert_eq!(s.partner(5), Some(0));
        assert_eq!(s.partner(6), None);
        assert_eq!(s.to_dot_bracket(), "((..)).");
    }

    #[test]
    // Purpose
    // -------
    // Unmatched brackets and unknown symbols are rejected.
    fn dot_bracket_rejects_malformed_input() {
        assert!(matches!(
            Structure::from_dot_bracket("(()"),
            Err(CorpusError::MalformedDotBracket { .. })
        ));
        assert!(matches!(
            Structure::from_dot_bracket("..)"),
            Err(CorpusError::MalformedDotBracket { position: 2, .. })
        ));
        assert!(matches!(
            Structure::from_dot_bracket("(x)"),
            Err(CorpusError::MalformedDotBracket { symbol: 'x', .. })
        ));
    }

    #[test]
    // Purpose
    // -------
    // `Structure::new` rejects crossing and asymmetric maps.
    //
    // Given
    // -----
    // - Crossing pairs (0,2), (1,3); an asymmetric map 0→1 with 1 unpaired.
    //
    // Expect
    // ------
    // - `CrossingPairs` and `InvalidPairing` respectively.
    fn new_rejects_crossing_and_asymmetric_maps() {
        let crossing = vec![Some(2), Some(3), Some(0), Some(1)];
        assert!(matches!(Structure::new(crossing), Err(CorpusError::CrossingPairs { .. })));

        let asymmetric = vec![Some(1), None];
        assert!(matches!(Structure::new(asymmetric), Err(CorpusError::InvalidPairing { .. })));
    }

    #[test]
    // Purpose
    // -------
    // Position mismatches count both ends of a missing pair.
    fn position_mismatches_counts_disagreeing_positions() {
        let a = Structure::from_dot_bracket("(....)").expect("valid");
        let b = Structure::unpaired(6);
        assert_eq!(a.position_mismatches(&b), Ok(2));
        assert!(a.position_mismatches(&Structure::unpaired(5)).is_err());
    }
}

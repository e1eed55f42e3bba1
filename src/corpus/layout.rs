//! Logical parameter layout: structural weights, evidence cells and
//! regularization groups.
//!
//! Index space
//! -----------
//! `[0, n_structural)` are CRF feature weights. After them, every evidence
//! cell `(channel, pairing state, source)` owns two consecutive entries,
//! `(log shape k, log scale θ)` of a Gamma emission density, laid out in
//! channel-major, then state, then source order.
//!
//! Every structural weight belongs to exactly one regularization group;
//! evidence parameters are unregularized.
use ndarray::Array1;

use crate::corpus::errors::{CorpusError, CorpusResult};

/// Number of pairing states an evidence observation can be emitted from.
pub const PAIRING_STATES: usize = 2;
/// Pairing state of an unpaired position.
pub const UNPAIRED: usize = 0;
/// Pairing state of a paired position.
pub const PAIRED: usize = 1;

/// One Gamma emission density: a `(channel, pairing state, source)` triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EvidenceCell {
    pub channel: usize,
    pub state: usize,
    pub source: usize,
}

impl EvidenceCell {
    pub fn new(channel: usize, state: usize, source: usize) -> Self {
        Self { channel, state, source }
    }
}

/// Which of a cell's two parameters is addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GammaParam {
    LogShape,
    LogScale,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParameterLayout {
    n_structural: usize,
    n_channels: usize,
    n_sources: usize,
    groups: Vec<usize>,
    n_groups: usize,
}

impl ParameterLayout {
    /// Build a layout with an explicit group per structural weight.
    ///
    /// # Errors
    /// [`CorpusError::InvalidGroups`] if `groups.len() != n_structural`, if
    /// there are no groups, or if some group id in `0..=max` is never used.
    pub fn new(
        n_structural: usize, n_channels: usize, n_sources: usize, groups: Vec<usize>,
    ) -> CorpusResult<Self> {
        if groups.len() != n_structural {
            return Err(CorpusError::InvalidGroups {
                reason: "one group id is required per structural weight",
            });
        }
        let n_groups = match groups.iter().max() {
            Some(&max) => max + 1,
            None => return Err(CorpusError::InvalidGroups { reason: "no structural weights" }),
        };
        let mut used = vec![false; n_groups];
        for &g in &groups {
            used[g] = true;
        }
        if used.iter().any(|u| !u) {
            return Err(CorpusError::InvalidGroups { reason: "group ids must be contiguous" });
        }
        Ok(Self { n_structural, n_channels, n_sources, groups, n_groups })
    }

    /// Layout where every structural weight shares one regularization group.
    pub fn single_group(n_structural: usize, n_channels: usize, n_sources: usize) -> Self {
        Self { n_structural, n_channels, n_sources, groups: vec![0; n_structural], n_groups: 1 }
    }

    pub fn dim(&self) -> usize {
        self.n_structural + 2 * self.n_channels * PAIRING_STATES * self.n_sources
    }

    pub fn n_structural(&self) -> usize {
        self.n_structural
    }

    pub fn n_channels(&self) -> usize {
        self.n_channels
    }

    pub fn n_sources(&self) -> usize {
        self.n_sources
    }

    pub fn n_groups(&self) -> usize {
        self.n_groups
    }

    pub fn has_evidence(&self) -> bool {
        self.n_channels > 0 && self.n_sources > 0
    }

    /// Regularization group of logical index `j`; `None` for evidence parameters.
    pub fn group_of(&self, j: usize) -> Option<usize> {
        self.groups.get(j).copied()
    }

    /// All evidence cells in layout order.
    pub fn evidence_cells(&self) -> impl Iterator<Item = EvidenceCell> + '_ {
        (0..self.n_channels).flat_map(move |channel| {
            (0..PAIRING_STATES).flat_map(move |state| {
                (0..self.n_sources).map(move |source| EvidenceCell { channel, state, source })
            })
        })
    }

    /// Logical index of one Gamma parameter of `cell`.
    ///
    /// # Errors
    /// [`CorpusError::UnknownEvidenceCell`] if the cell is outside the layout.
    pub fn logical_index(&self, cell: EvidenceCell, param: GammaParam) -> CorpusResult<usize> {
        if cell.channel >= self.n_channels
            || cell.source >= self.n_sources
            || cell.state >= PAIRING_STATES
        {
            return Err(CorpusError::UnknownEvidenceCell {
                channel: cell.channel,
                source: cell.source,
            });
        }
        let slot = (cell.channel * PAIRING_STATES + cell.state) * self.n_sources + cell.source;
        let offset = match param {
            GammaParam::LogShape => 0,
            GammaParam::LogScale => 1,
        };
        Ok(self.n_structural + 2 * slot + offset)
    }

    /// `(k, θ) = (exp w[log k], exp w[log θ])` for `cell`.
    ///
    /// # Errors
    /// Propagates [`Self::logical_index`] and [`Self::check_dim`] failures.
    pub fn gamma_parameters(&self, w: &Array1<f64>, cell: EvidenceCell) -> CorpusResult<(f64, f64)> {
        self.check_dim(w)?;
        let k = w[self.logical_index(cell, GammaParam::LogShape)?].exp();
        let theta = w[self.logical_index(cell, GammaParam::LogScale)?].exp();
        Ok((k, theta))
    }

    /// # Errors
    /// [`CorpusError::DimensionMismatch`] if `w.len() != dim()`.
    pub fn check_dim(&self, w: &Array1<f64>) -> CorpusResult<()> {
        if w.len() != self.dim() {
            return Err(CorpusError::DimensionMismatch { expected: self.dim(), found: w.len() });
        }
        Ok(())
    }

    /// Multiply the structural weights by `log_base`; evidence entries are
    /// left unchanged.
    pub fn rescale(&self, w: &Array1<f64>, log_base: f64) -> Array1<f64> {
        let mut out = w.clone();
        out.iter_mut().take(self.n_structural).for_each(|x| *x *= log_base);
        out
    }

    /// Per-parameter regularization strengths from per-group values
    /// (`0` for evidence parameters).
    ///
    /// # Errors
    /// [`CorpusError::DimensionMismatch`] if `c.len() != n_groups()`.
    pub fn expand_hyperparameters(&self, c: &Array1<f64>) -> CorpusResult<Array1<f64>> {
        if c.len() != self.n_groups {
            return Err(CorpusError::DimensionMismatch { expected: self.n_groups, found: c.len() });
        }
        let mut out = Array1::zeros(self.dim());
        for (j, &g) in self.groups.iter().enumerate() {
            out[j] = c[g];
        }
        Ok(out)
    }

    /// Vector with ones on the structural weights and zeros elsewhere.
    pub fn structural_ones(&self) -> Array1<f64> {
        let mut out = Array1::zeros(self.dim());
        out.iter_mut().take(self.n_structural).for_each(|x| *x = 1.0);
        out
    }
}

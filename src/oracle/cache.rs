//! Single-entry memoization of batch results.
//!
//! A [`CacheSlot`] remembers the last batch result together with the exact
//! key that produced it. Keys compare parameter vectors and scalar settings
//! by their bit patterns, so a hit returns precisely what a fresh evaluation
//! at the same inputs would.
use std::cell::RefCell;

use ndarray::Array1;

use crate::{corpus::EvidenceCell, dispatch::ObjectiveToggles};

/// Which structural objective a cached result belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectiveKind {
    Standard,
    Em,
    /// Evidence-augmented objective with the unsupervised weight's bits.
    Se { hyperparam_data: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum CacheKind {
    Objective { toggles: ObjectiveToggles, kind: ObjectiveKind },
    /// Gamma statistics of one cell at one data scale (bits).
    Gamma { cell: EvidenceCell, scale: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    units: Vec<usize>,
    weights: Vec<u64>,
    kind: CacheKind,
    log_base: u64,
}

impl CacheKey {
    fn new(units: &[usize], weights: &Array1<f64>, kind: CacheKind, log_base: f64) -> Self {
        Self {
            units: units.to_vec(),
            weights: weights.iter().map(|w| w.to_bits()).collect(),
            kind,
            log_base: log_base.to_bits(),
        }
    }

    pub fn objective(
        units: &[usize], weights: &Array1<f64>, toggles: ObjectiveToggles, kind: ObjectiveKind,
        log_base: f64,
    ) -> Self {
        Self::new(units, weights, CacheKind::Objective { toggles, kind }, log_base)
    }

    pub fn gamma(
        units: &[usize], weights: &Array1<f64>, cell: EvidenceCell, scale: f64, log_base: f64,
    ) -> Self {
        Self::new(units, weights, CacheKind::Gamma { cell, scale: scale.to_bits() }, log_base)
    }
}

/// One memoized `(key, result)` pair; storing a new key evicts the old one.
#[derive(Debug, Default)]
pub struct CacheSlot {
    entry: RefCell<Option<(CacheKey, Array1<f64>)>>,
}

impl CacheSlot {
    pub fn lookup(&self, key: &CacheKey) -> Option<Array1<f64>> {
        match &*self.entry.borrow() {
            Some((stored, value)) if stored == key => Some(value.clone()),
            _ => None,
        }
    }

    pub fn store(&self, key: CacheKey, value: Array1<f64>) {
        *self.entry.borrow_mut() = Some((key, value));
    }

    pub fn clear(&self) {
        *self.entry.borrow_mut() = None;
    }

    pub fn is_empty(&self) -> bool {
        self.entry.borrow().is_none()
    }
}

//! training::em — the gradient/EM hybrid inner strategy.
//!
//! One EM iteration alternates two M-steps after the E-step statistics at
//! the current point:
//! - an evidence update ([`EvidenceUpdate`]) refitting the Gamma emission
//!   parameters of the enabled `(channel, state)` cells;
//! - a structural update ([`StructuralUpdate`]) taking one backtracking
//!   gradient step on the regularized EM objective.
//!
//! Both halves are strategies so callers can swap either one; [`EmInner`]
//! composes them. A full EM minimization is not provided.
use ndarray::Array1;
use tracing::{debug, info, warn};

use crate::{
    corpus::{EvidenceCell, GammaParam},
    dispatch::{ObjectiveToggles, fit_gamma_mle},
    engine::InferenceEngine,
    oracle::ComputationOracle,
    training::{
        errors::{TrainError, TrainResult},
        inner::{InnerOptimizer, InnerSolution, expand_regularization, penalty},
        options::EmOptions,
    },
};

/// Sufficient decrease constant of the structural backtracking.
const ARMIJO: f64 = 1e-4;

/// Per-`(channel, state)` switch for evidence updates; missing entries are off.
pub fn cell_enabled(config: &[Vec<bool>], cell: EvidenceCell) -> bool {
    config.get(cell.channel).and_then(|row| row.get(cell.state)).copied().unwrap_or(false)
}

pub trait EvidenceUpdate {
    /// New parameter vector with refitted evidence entries; statistics are
    /// taken at `x`.
    fn update<E: InferenceEngine>(
        &self, oracle: &ComputationOracle<E>, units: &[usize], x: &Array1<f64>,
        config: &[Vec<bool>],
    ) -> TrainResult<Array1<f64>>;
}

pub trait StructuralUpdate {
    /// New parameter vector and its regularized EM objective value.
    fn update<E: InferenceEngine>(
        &self, oracle: &ComputationOracle<E>, units: &[usize], x: &Array1<f64>,
        c_full: &Array1<f64>, iteration: usize,
    ) -> TrainResult<(Array1<f64>, f64)>;
}

/// Leaves every evidence parameter unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoEvidence;

impl EvidenceUpdate for NoEvidence {
    fn update<E: InferenceEngine>(
        &self, _oracle: &ComputationOracle<E>, _units: &[usize], x: &Array1<f64>,
        _config: &[Vec<bool>],
    ) -> TrainResult<Array1<f64>> {
        Ok(x.clone())
    }
}

/// Gamma maximum likelihood per enabled cell.
///
/// The observations are first expressed in units of their weighted mean,
/// the shape is fitted by Newton's method and the scale in closed form, and
/// the scale is mapped back to data units.
#[derive(Debug, Clone, Copy, Default)]
pub struct GammaEvidenceUpdate;

impl EvidenceUpdate for GammaEvidenceUpdate {
    fn update<E: InferenceEngine>(
        &self, oracle: &ComputationOracle<E>, units: &[usize], x: &Array1<f64>,
        config: &[Vec<bool>],
    ) -> TrainResult<Array1<f64>> {
        let layout = oracle.distributor().dispatcher().layout();
        let mut next = x.clone();
        for cell in layout.evidence_cells() {
            if !cell_enabled(config, cell) {
                continue;
            }
            let (sum, count) = oracle.compute_gamma_mle_scaling_factor(units, x, cell)?;
            if !(sum > 0.0 && count > 0.0) {
                debug!(?cell, sum, count, "no evidence mass; keeping parameters");
                continue;
            }
            let scale = sum / count;
            let stats = oracle.compute_gamma_mle_statistics(units, x, cell, scale)?;
            let Some((shape, rebased_scale)) = fit_gamma_mle(&stats) else {
                continue;
            };
            next[layout.logical_index(cell, GammaParam::LogShape)?] = shape.ln();
            next[layout.logical_index(cell, GammaParam::LogScale)?] = (rebased_scale * scale).ln();
            debug!(?cell, shape, scale = rebased_scale * scale, "refitted evidence cell");
        }
        Ok(next)
    }
}

/// One backtracking gradient step on the structural weights.
#[derive(Debug, Clone, Copy)]
pub struct GradientEmStep {
    pub options: EmOptions,
    pub toggles: ObjectiveToggles,
}

impl GradientEmStep {
    pub fn new(options: EmOptions, toggles: ObjectiveToggles) -> Self {
        Self { options, toggles }
    }
}

impl StructuralUpdate for GradientEmStep {
    fn update<E: InferenceEngine>(
        &self, oracle: &ComputationOracle<E>, units: &[usize], x: &Array1<f64>,
        c_full: &Array1<f64>, iteration: usize,
    ) -> TrainResult<(Array1<f64>, f64)> {
        let layout = oracle.distributor().dispatcher().layout();
        let value = |w: &Array1<f64>| -> TrainResult<f64> {
            Ok(oracle.compute_em_function(units, w, self.toggles)? + penalty(c_full, w))
        };
        let f0 = value(x)?;
        let g = (oracle.compute_em_gradient(units, x, self.toggles)? + c_full * x)
            * &layout.structural_ones();
        let g_sq = g.dot(&g);
        if g_sq == 0.0 {
            return Ok((x.clone(), f0));
        }

        let mut step = self.options.initial_step;
        for _ in 0..self.options.max_backtracks {
            let candidate = x - &(&g * step);
            let f = value(&candidate)?;
            if f <= f0 - ARMIJO * step * g_sq {
                debug!(iteration, step, value = f, "structural step accepted");
                return Ok((candidate, f));
            }
            step *= 0.5;
        }
        warn!(iteration, value = f0, "no decrease along the EM gradient; keeping weights");
        Ok((x.clone(), f0))
    }
}

/// Gradient/EM hybrid over a fixed set of training units.
pub struct EmInner<'a, E: InferenceEngine, S = GradientEmStep, V = GammaEvidenceUpdate> {
    oracle: &'a ComputationOracle<E>,
    units: Vec<usize>,
    c_full: Array1<f64>,
    structural: S,
    evidence: V,
}

impl<'a, E, S, V> EmInner<'a, E, S, V>
where
    E: InferenceEngine,
    S: StructuralUpdate,
    V: EvidenceUpdate,
{
    /// # Errors
    /// Invalid or mis-sized per-group strengths `c`.
    pub fn new(
        oracle: &'a ComputationOracle<E>, units: Vec<usize>, c: &Array1<f64>, structural: S,
        evidence: V,
    ) -> TrainResult<Self> {
        let c_full = expand_regularization(oracle, c)?;
        Ok(Self { oracle, units, c_full, structural, evidence })
    }

    /// One EM iteration in place; returns the regularized EM objective at
    /// the updated `x`.
    ///
    /// `config[channel][state]` enables the evidence update of every source
    /// of that cell.
    pub fn one_step(
        &self, x: &mut Array1<f64>, iteration: usize, config: &[Vec<bool>],
    ) -> TrainResult<f64> {
        let refitted = self.evidence.update(self.oracle, &self.units, x, config)?;
        let (next, value) =
            self.structural.update(self.oracle, &self.units, &refitted, &self.c_full, iteration)?;
        *x = next;
        info!(iteration, value, "EM iteration");
        Ok(value)
    }
}

impl<'a, E, S, V> InnerOptimizer for EmInner<'a, E, S, V>
where
    E: InferenceEngine,
    S: StructuralUpdate,
    V: EvidenceUpdate,
{
    fn name(&self) -> &'static str {
        "em"
    }

    fn toggles(&self) -> ObjectiveToggles {
        ObjectiveToggles::smooth()
    }

    fn units(&self) -> &[usize] {
        &self.units
    }

    fn minimize(&self, _initial: &Array1<f64>, _c: &Array1<f64>) -> TrainResult<InnerSolution> {
        Err(TrainError::NotImplemented { operation: "EmInner::minimize" })
    }
}

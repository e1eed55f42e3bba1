//! oracle::computation — batch-level numeric queries with memoization.
//!
//! Purpose
//! -------
//! Expose the dispatcher's commands as named queries over sets of example
//! indices ("units"): objective values, gradients, evidence statistics,
//! Hessian-vector products, bounds, losses and predictions. Every query
//! returns the elementwise sum of the per-example results.
//!
//! Key behaviors
//! -------------
//! - Two independent memoization slots: one for the structural objectives
//!   (standard, EM, evidence-augmented) and one for Gamma statistics. The
//!   function and gradient of one objective come from the same dispatcher
//!   pass, so querying both at an unchanged key costs a single batch.
//! - A precision failure is logged with `error!`, its offending parameter
//!   vector is dumped under the configured diagnostics directory, and the
//!   error is returned to the caller.
//!
//! Invariants & assumptions
//! ------------------------
//! - Single writer: the caches live in `RefCell`s and the oracle is not
//!   shared between concurrently running optimizers.
//! - Cache hits are bit-for-bit equal to fresh evaluations; keys compare
//!   parameter bits, units, toggles, objective kind and `log_base`.
//!
//! Downstream usage
//! ----------------
//! - The inner and outer optimizers in [`crate::training`] hold a reference
//!   to one oracle for the whole run.
use std::{cell::Cell, path::PathBuf};

use ndarray::{Array1, s};
use tracing::{debug, error, info, warn};

use crate::{
    corpus::{EvidenceCell, GammaParam, PredictOutputs},
    dispatch::{
        Command, DispatchError, DispatchResult, Distributor, ObjectiveToggles, Request,
        gamma::log_param_gradient,
    },
    engine::{Decoding, GammaCounts, InferenceEngine},
    oracle::{
        cache::{CacheKey, CacheSlot, ObjectiveKind},
        diagnostics::write_params_dump,
    },
    optimization::objective_optimizer::finite_diff::central_gradient,
};

#[derive(Debug)]
pub struct ComputationOracle<E: InferenceEngine> {
    distributor: Distributor<E>,
    log_base: f64,
    diagnostics_dir: Option<PathBuf>,
    objective_cache: CacheSlot,
    gamma_cache: CacheSlot,
    batches: Cell<usize>,
}

impl<E: InferenceEngine> ComputationOracle<E> {
    /// # Errors
    /// [`DispatchError::InvalidLogBase`] unless `log_base` is finite and positive.
    pub fn new(distributor: Distributor<E>, log_base: f64) -> DispatchResult<Self> {
        if !(log_base.is_finite() && log_base > 0.0) {
            return Err(DispatchError::InvalidLogBase { value: log_base });
        }
        Ok(Self {
            distributor,
            log_base,
            diagnostics_dir: None,
            objective_cache: CacheSlot::default(),
            gamma_cache: CacheSlot::default(),
            batches: Cell::new(0),
        })
    }

    /// Directory receiving `<example>.params` dumps on precision failures.
    pub fn with_diagnostics_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.diagnostics_dir = Some(dir.into());
        self
    }

    pub fn log_base(&self) -> f64 {
        self.log_base
    }

    pub fn dim(&self) -> usize {
        self.distributor.dispatcher().layout().dim()
    }

    pub fn distributor(&self) -> &Distributor<E> {
        &self.distributor
    }

    /// Number of dispatched batches so far (cache hits do not count).
    pub fn batches(&self) -> usize {
        self.batches.get()
    }

    pub fn clear_caches(&self) {
        self.objective_cache.clear();
        self.gamma_cache.clear();
    }

    fn request(&self, command: Command) -> Request {
        Request { log_base: self.log_base, command }
    }

    fn run(&self, command: Command, units: &[usize]) -> DispatchResult<Array1<f64>> {
        self.batches.set(self.batches.get() + 1);
        let result = self.distributor.run(&self.request(command), units);
        if let Err(DispatchError::PrecisionViolation { example, value, params }) = &result {
            error!(example = example.as_str(), value, "objective below roundoff tolerance");
            if let Some(dir) = &self.diagnostics_dir {
                match write_params_dump(dir, example, params) {
                    Ok(path) => error!(path = %path.display(), "wrote parameter dump"),
                    Err(err) => error!(%err, "could not write parameter dump"),
                }
            }
        }
        result
    }

    // ---- Corpus-level queries ----

    pub fn all_units(&self) -> Vec<usize> {
        self.distributor.dispatcher().corpus().all_units()
    }

    /// Keep the units whose examples admit a structure consistent with their truth.
    pub fn filter_nonparsable(&self, units: &[usize]) -> DispatchResult<Vec<usize>> {
        let flags = self.run(Command::CheckParsability, units)?;
        let corpus = self.distributor.dispatcher().corpus();
        let mut kept = Vec::with_capacity(units.len());
        for &unit in units {
            if flags[unit] > 0.5 {
                kept.push(unit);
            } else {
                let name = corpus.get(unit).map(|e| e.name().to_string()).unwrap_or_default();
                warn!(unit, example = name.as_str(), "dropping unparsable example");
            }
        }
        Ok(kept)
    }

    /// Whether any example in `units` has zero-valued `(channel, source)` evidence.
    pub fn find_zeros_in_data(
        &self, units: &[usize], channel: usize, source: usize,
    ) -> DispatchResult<bool> {
        let flags = self.run(Command::FindZeros { channel, source }, units)?;
        Ok(flags.iter().any(|&f| f > 0.0))
    }

    /// `sqrt(2 Σ_i bound_i / min C)`: a radius containing the regularized optimum.
    ///
    /// # Errors
    /// [`DispatchError::InvalidRegularization`] for a non-positive strength.
    pub fn compute_solution_norm_bound(
        &self, units: &[usize], c: &Array1<f64>, use_loss: bool,
    ) -> DispatchResult<f64> {
        let min_c = c.iter().copied().fold(f64::INFINITY, f64::min);
        if !(min_c.is_finite() && min_c > 0.0) {
            return Err(DispatchError::InvalidRegularization { value: min_c });
        }
        let total = self.run(Command::SolutionNormBound { use_loss }, units)?.sum();
        Ok((2.0 * total / min_c).sqrt())
    }

    pub fn compute_gradient_norm_bound(&self, units: &[usize]) -> DispatchResult<f64> {
        Ok(self.run(Command::GradientNormBound, units)?.sum())
    }

    /// Decode every unit and write the configured artifacts.
    ///
    /// # Errors
    /// [`crate::corpus::CorpusError::SingleFileDestination`] when a single-file
    /// destination is combined with more than one unit, plus dispatch failures.
    pub fn predict(
        &self, units: &[usize], weights: &Array1<f64>, decoding: Decoding, outputs: &PredictOutputs,
    ) -> DispatchResult<()> {
        outputs.check_unit_count(units.len())?;
        self.run(
            Command::Predict { weights: weights.clone(), decoding, outputs: outputs.clone() },
            units,
        )?;
        info!(units = units.len(), ?decoding, "wrote predictions");
        Ok(())
    }

    pub fn compute_loss(
        &self, units: &[usize], weights: &Array1<f64>, decoding: Decoding,
    ) -> DispatchResult<f64> {
        Ok(self.run(Command::Loss { weights: weights.clone(), decoding }, units)?.sum())
    }

    // ---- Structural objectives ----

    fn objective(
        &self, units: &[usize], weights: &Array1<f64>, toggles: ObjectiveToggles, kind: ObjectiveKind,
    ) -> DispatchResult<Array1<f64>> {
        let key = CacheKey::objective(units, weights, toggles, kind, self.log_base);
        if let Some(hit) = self.objective_cache.lookup(&key) {
            debug!(?kind, units = units.len(), "objective cache hit");
            return Ok(hit);
        }
        let weights = weights.clone();
        let command = match kind {
            ObjectiveKind::Standard => Command::FunctionGradient { weights, toggles },
            ObjectiveKind::Em => Command::EmFunctionGradient { weights, toggles },
            ObjectiveKind::Se { hyperparam_data } => Command::FunctionGradientSe {
                weights,
                toggles,
                hyperparam_data: f64::from_bits(hyperparam_data),
            },
        };
        let result = self.run(command, units)?;
        self.objective_cache.store(key, result.clone());
        Ok(result)
    }

    fn split_value(result: &Array1<f64>) -> f64 {
        result[result.len() - 1]
    }

    fn split_gradient(result: &Array1<f64>) -> Array1<f64> {
        result.slice(s![..result.len() - 1]).to_owned()
    }

    pub fn compute_function(
        &self, units: &[usize], weights: &Array1<f64>, toggles: ObjectiveToggles,
    ) -> DispatchResult<f64> {
        Ok(Self::split_value(&self.objective(units, weights, toggles, ObjectiveKind::Standard)?))
    }

    pub fn compute_gradient(
        &self, units: &[usize], weights: &Array1<f64>, toggles: ObjectiveToggles,
    ) -> DispatchResult<Array1<f64>> {
        Ok(Self::split_gradient(&self.objective(units, weights, toggles, ObjectiveKind::Standard)?))
    }

    pub fn compute_em_function(
        &self, units: &[usize], weights: &Array1<f64>, toggles: ObjectiveToggles,
    ) -> DispatchResult<f64> {
        Ok(Self::split_value(&self.objective(units, weights, toggles, ObjectiveKind::Em)?))
    }

    pub fn compute_em_gradient(
        &self, units: &[usize], weights: &Array1<f64>, toggles: ObjectiveToggles,
    ) -> DispatchResult<Array1<f64>> {
        Ok(Self::split_gradient(&self.objective(units, weights, toggles, ObjectiveKind::Em)?))
    }

    pub fn compute_function_se(
        &self, units: &[usize], weights: &Array1<f64>, toggles: ObjectiveToggles,
        hyperparam_data: f64,
    ) -> DispatchResult<f64> {
        let kind = ObjectiveKind::Se { hyperparam_data: hyperparam_data.to_bits() };
        Ok(Self::split_value(&self.objective(units, weights, toggles, kind)?))
    }

    pub fn compute_gradient_se(
        &self, units: &[usize], weights: &Array1<f64>, toggles: ObjectiveToggles,
        hyperparam_data: f64,
    ) -> DispatchResult<Array1<f64>> {
        let kind = ObjectiveKind::Se { hyperparam_data: hyperparam_data.to_bits() };
        Ok(Self::split_gradient(&self.objective(units, weights, toggles, kind)?))
    }

    /// Central-difference product of the standard objective's Hessian with `v`.
    ///
    /// # Errors
    /// [`DispatchError::NonsmoothHessian`] when `toggles.nonsmooth` is set.
    pub fn compute_hessian_vector_product(
        &self, units: &[usize], weights: &Array1<f64>, v: &Array1<f64>, toggles: ObjectiveToggles,
    ) -> DispatchResult<Array1<f64>> {
        if toggles.nonsmooth {
            return Err(DispatchError::NonsmoothHessian);
        }
        self.run(
            Command::HessianVectorProduct { weights: weights.clone(), direction: v.clone(), toggles },
            units,
        )
    }

    /// Largest absolute gap between the analytic gradient and a central
    /// difference of the standard objective; logged at `info`.
    pub fn sanity_check_gradient(
        &self, units: &[usize], weights: &Array1<f64>, toggles: ObjectiveToggles,
    ) -> DispatchResult<f64> {
        let analytic = self.compute_gradient(units, weights, toggles)?;
        let numeric = central_gradient(|w| self.compute_function(units, w, toggles), weights)?;
        let mut worst = (0usize, 0.0f64);
        for (j, (a, n)) in analytic.iter().zip(numeric.iter()).enumerate() {
            let gap = (a - n).abs();
            if gap > worst.1 {
                worst = (j, gap);
            }
        }
        info!(index = worst.0, gap = worst.1, "gradient sanity check");
        Ok(worst.1)
    }

    // ---- Evidence statistics ----

    /// Rebased, summed `(Σd, Σ ln d, N)` of `cell` together with the summed
    /// log-likelihood at the cell's current parameters.
    fn gamma_stats(
        &self, units: &[usize], weights: &Array1<f64>, cell: EvidenceCell, scale: f64,
    ) -> DispatchResult<Array1<f64>> {
        let key = CacheKey::gamma(units, weights, cell, scale, self.log_base);
        if let Some(hit) = self.gamma_cache.lookup(&key) {
            debug!(?cell, units = units.len(), "gamma cache hit");
            return Ok(hit);
        }
        let result = self.run(Command::GammaMle { weights: weights.clone(), cell, scale }, units)?;
        self.gamma_cache.store(key, result.clone());
        Ok(result)
    }

    pub fn compute_gamma_mle_statistics(
        &self, units: &[usize], weights: &Array1<f64>, cell: EvidenceCell, scale: f64,
    ) -> DispatchResult<GammaCounts> {
        let stats = self.gamma_stats(units, weights, cell, scale)?;
        Ok(GammaCounts { sum: stats[0], sum_log: stats[1], count: stats[2] })
    }

    /// Negative Gamma log-likelihood of `cell` at the parameters in `weights`,
    /// over observations expressed in units of `scale` (the scale parameter
    /// is divided by `scale` accordingly).
    pub fn compute_gamma_mle_function(
        &self, units: &[usize], weights: &Array1<f64>, cell: EvidenceCell, scale: f64,
    ) -> DispatchResult<f64> {
        Ok(-self.gamma_stats(units, weights, cell, scale)?[3])
    }

    /// Gradient of [`Self::compute_gamma_mle_function`] over the full
    /// parameter vector; only the cell's `(ln k, ln θ)` entries are non-zero.
    pub fn compute_gamma_mle_gradient(
        &self, units: &[usize], weights: &Array1<f64>, cell: EvidenceCell, scale: f64,
    ) -> DispatchResult<Array1<f64>> {
        let counts = self.compute_gamma_mle_statistics(units, weights, cell, scale)?;
        let layout = self.distributor.dispatcher().layout();
        let (k, theta) = layout.gamma_parameters(weights, cell)?;
        let (d_shape, d_scale) = log_param_gradient(&counts, k, theta / scale);
        let mut g = Array1::zeros(layout.dim());
        g[layout.logical_index(cell, GammaParam::LogShape)?] = -d_shape;
        g[layout.logical_index(cell, GammaParam::LogScale)?] = -d_scale;
        Ok(g)
    }

    /// Un-rebased `(Σd, N)` of `cell`, used to pick the data scale.
    pub fn compute_gamma_mle_scaling_factor(
        &self, units: &[usize], weights: &Array1<f64>, cell: EvidenceCell,
    ) -> DispatchResult<(f64, f64)> {
        let out = self.run(Command::GammaScalingFactor { weights: weights.clone(), cell }, units)?;
        Ok((out[0], out[1]))
    }
}

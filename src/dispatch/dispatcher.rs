//! dispatch::dispatcher — per-example evaluation of objective commands.
//!
//! Purpose
//! -------
//! Turn one [`Request`] and one example index into a sequence of calls
//! against an [`InferenceEngine`] and shape the numeric result. Every command
//! follows the same template: load the example, load the (rescaled)
//! parameter vector, optionally clamp to the ground truth and/or install a
//! loss potential, run one or two passes, derive scores and counts, shape
//! the result vector.
//!
//! Key behaviors
//! -------------
//! - Structural weights reach the engine multiplied by `log_base`; objective
//!   values are divided by it on the way out, so the gradient with respect to
//!   the unscaled weights is the plain feature-count difference.
//! - Sparse commands return a corpus-sized vector with a single non-zero
//!   entry at the example's index; dense objectives return
//!   `[gradient…, value]`.
//! - An unparsable example (`Score::Invalid` on either pass) contributes an
//!   all-zero vector and a `warn!` event.
//!
//! Invariants & assumptions
//! ------------------------
//! - Conditional scores never exceed unconditional ones beyond a relative
//!   slack of [`INVARIANT_REL_TOL`]; a breach is an engine bug and is
//!   returned as [`DispatchError::InvariantViolation`].
//! - Per-example structural objective values below `−ROUNDOFF_TOL` are
//!   returned as [`DispatchError::PrecisionViolation`]; values in
//!   `[−ROUNDOFF_TOL, 0)` are clamped to zero.
//! - The evidence-augmented objective is a negative log-density and is not
//!   subject to either check.
//!
//! Conventions
//! -----------
//! - Unconditional pass: log-partition (smooth) or Viterbi (non-smooth)
//!   without constraints. Conditional pass: the same, clamped to the truth.
//! - Gamma parameters are read from the unscaled weight vector.
use std::sync::Arc;

use ndarray::{Array1, s};
use tracing::warn;

use crate::{
    corpus::{
        Corpus, CorpusError, EvidenceCell, Example, GammaParam, ParameterLayout, Structure,
    },
    dispatch::{
        command::{Command, ObjectiveToggles, Request},
        errors::{DispatchError, DispatchResult},
        gamma::{log_likelihood, log_param_gradient, rebase},
    },
    engine::{Decoding, GammaCounts, InferenceEngine, Pass, Score},
    optimization::{
        numerical_stability::{ROUNDOFF_TOL, clamp_roundoff},
        objective_optimizer::finite_diff::{HVP_STEP, hessian_vector_product},
    },
};

/// Relative slack allowed when comparing conditional and unconditional scores.
pub const INVARIANT_REL_TOL: f64 = 1e-6;

/// Which conditional pass a structural objective uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Conditional {
    /// Clamp to the ground truth; required.
    Truth,
    /// Clamp when the truth is known, else score the expected statistics.
    TruthOrExpected,
}

/// Score and feature counts of one pass.
struct PassResult {
    score: Score,
    counts: Array1<f64>,
}

/// Evaluates commands against a shared, immutable corpus.
#[derive(Debug, Clone)]
pub struct Dispatcher<E: InferenceEngine> {
    corpus: Corpus,
    layout: Arc<ParameterLayout>,
    prototype: E,
}

impl<E: InferenceEngine> Dispatcher<E> {
    /// # Errors
    /// [`DispatchError::Corpus`] if the engine's structural feature count does
    /// not match the layout.
    pub fn new(corpus: Corpus, layout: Arc<ParameterLayout>, prototype: E) -> DispatchResult<Self> {
        if prototype.num_structural_features() != layout.n_structural() {
            return Err(CorpusError::DimensionMismatch {
                expected: layout.n_structural(),
                found: prototype.num_structural_features(),
            }
            .into());
        }
        Ok(Self { corpus, layout, prototype })
    }

    pub fn corpus(&self) -> &Corpus {
        &self.corpus
    }

    pub fn layout(&self) -> &ParameterLayout {
        &self.layout
    }

    /// A fresh engine for one worker.
    pub fn engine(&self) -> E {
        self.prototype.clone()
    }

    /// Evaluate `request` on example `index` using `engine` as scratch space.
    ///
    /// # Errors
    /// Configuration errors, numerical invariant breaches, and engine or
    /// corpus failures; see [`DispatchError`].
    pub fn evaluate(
        &self, engine: &mut E, request: &Request, index: usize,
    ) -> DispatchResult<Array1<f64>> {
        let lb = request.log_base;
        if !(lb.is_finite() && lb > 0.0) {
            return Err(DispatchError::InvalidLogBase { value: lb });
        }
        let example = self.corpus.get(index)?;
        engine.load_sequence(example)?;

        match &request.command {
            Command::CheckParsability => self.check_parsability(engine, example, index),
            Command::SolutionNormBound { use_loss } => {
                self.solution_norm_bound(engine, example, index, lb, *use_loss)
            }
            Command::GradientNormBound => self.gradient_norm_bound(engine, example, index),
            Command::Loss { weights, decoding } => {
                self.loss(engine, example, index, weights, lb, *decoding)
            }
            Command::FunctionGradient { weights, toggles } => {
                self.function_gradient(engine, example, weights, lb, *toggles, Conditional::Truth)
            }
            Command::EmFunctionGradient { weights, toggles } => self.function_gradient(
                engine,
                example,
                weights,
                lb,
                *toggles,
                Conditional::TruthOrExpected,
            ),
            Command::GammaMle { weights, cell, scale } => {
                self.gamma_mle(engine, example, weights, lb, *cell, *scale)
            }
            Command::GammaScalingFactor { weights, cell } => {
                self.gamma_scaling_factor(engine, example, weights, lb, *cell)
            }
            Command::FindZeros { channel, source } => {
                let flag = example.has_zero_evidence(*channel, *source);
                Ok(self.sparse(index, if flag { 1.0 } else { 0.0 }))
            }
            Command::FunctionGradientSe { weights, toggles, hyperparam_data } => {
                self.function_gradient_se(engine, example, weights, lb, *toggles, *hyperparam_data)
            }
            Command::HessianVectorProduct { weights, direction, toggles } => {
                self.hessian_vector_product(engine, example, weights, direction, lb, *toggles)
            }
            Command::Predict { weights, decoding, outputs } => {
                self.load_weights(engine, weights, lb)?;
                let predicted = self.decode(engine, *decoding)?;
                let posteriors = if outputs.posteriors.is_some() {
                    if !decoding.needs_posteriors() {
                        engine.compute_outside(Pass::Plain)?;
                    }
                    Some(engine.pair_posteriors()?)
                } else {
                    None
                };
                outputs.write_all(example, &predicted, posteriors.as_ref(), decoding.gain())?;
                Ok(Array1::zeros(0))
            }
        }
    }

    // ---- Helpers ----

    fn sparse(&self, index: usize, value: f64) -> Array1<f64> {
        let mut out = Array1::zeros(self.corpus.len());
        out[index] = value;
        out
    }

    fn load_weights(&self, engine: &mut E, weights: &Array1<f64>, lb: f64) -> DispatchResult<()> {
        self.layout.check_dim(weights)?;
        engine.load_values(&self.layout.rescale(weights, lb))?;
        Ok(())
    }

    fn truth<'a>(&self, example: &'a Example) -> DispatchResult<&'a Structure> {
        example
            .truth()
            .ok_or_else(|| DispatchError::MissingGroundTruth { example: example.name().to_string() })
    }

    /// Pad structural counts to the full parameter dimension.
    fn padded(&self, counts: &Array1<f64>) -> Array1<f64> {
        let mut out = Array1::zeros(self.layout.dim());
        let n = counts.len().min(self.layout.n_structural());
        out.slice_mut(s![..n]).assign(&counts.slice(s![..n]));
        out
    }

    fn dense(&self, gradient: Array1<f64>, value: f64) -> Array1<f64> {
        let dim = self.layout.dim();
        let mut out = Array1::zeros(dim + 1);
        out.slice_mut(s![..dim]).assign(&gradient);
        out[dim] = value;
        out
    }

    fn warn_invalid(&self, example: &Example, command: &'static str) {
        warn!(example = example.name(), command, "no admissible structure; contribution zeroed");
    }

    /// Log-partition with expected counts (smooth) or Viterbi with its counts.
    fn structural_pass(&self, engine: &mut E, pass: Pass, nonsmooth: bool) -> DispatchResult<PassResult> {
        if nonsmooth {
            engine.compute_viterbi(pass)?;
            let score = engine.viterbi_score();
            let counts = if score.is_valid() {
                engine.viterbi_features()?
            } else {
                Array1::zeros(self.layout.n_structural())
            };
            Ok(PassResult { score, counts })
        } else {
            engine.compute_inside(pass)?;
            let score = engine.log_partition();
            let counts = if score.is_valid() {
                engine.compute_outside(pass)?;
                engine.feature_expectations()?
            } else {
                Array1::zeros(self.layout.n_structural())
            };
            Ok(PassResult { score, counts })
        }
    }

    fn decode(&self, engine: &mut E, decoding: Decoding) -> DispatchResult<Structure> {
        let structure = match decoding {
            Decoding::Viterbi => {
                engine.compute_viterbi(Pass::Plain)?;
                engine.predict_viterbi()?
            }
            Decoding::MaxExpectedAccuracy { gain } => {
                engine.compute_inside(Pass::Plain)?;
                engine.compute_outside(Pass::Plain)?;
                engine.predict_posterior(gain)?
            }
            Decoding::Centroid { gain } => {
                engine.compute_inside(Pass::Plain)?;
                engine.compute_outside(Pass::Plain)?;
                engine.predict_centroid(gain)?
            }
        };
        Ok(structure)
    }

    // ---- Bounds and checks ----

    fn check_parsability(
        &self, engine: &mut E, example: &Example, index: usize,
    ) -> DispatchResult<Array1<f64>> {
        engine.load_values(&Array1::zeros(self.layout.dim()))?;
        if let Some(truth) = example.truth() {
            engine.use_constraints(truth)?;
        }
        engine.compute_viterbi(Pass::Plain)?;
        let parsable = engine.viterbi_score().is_valid();
        Ok(self.sparse(index, if parsable { 1.0 } else { 0.0 }))
    }

    fn solution_norm_bound(
        &self, engine: &mut E, example: &Example, index: usize, lb: f64, use_loss: bool,
    ) -> DispatchResult<Array1<f64>> {
        engine.load_values(&Array1::zeros(self.layout.dim()))?;
        engine.compute_inside(Pass::Plain)?;
        let Some(log_z) = engine.log_partition().value() else {
            self.warn_invalid(example, "solution_norm_bound");
            return Ok(self.sparse(index, 0.0));
        };
        let mut bound = log_z / lb;
        if use_loss {
            if let Some(truth) = example.truth() {
                engine.use_loss(truth, 1.0)?;
                engine.compute_viterbi(Pass::Plain)?;
                bound += engine.viterbi_score().value().unwrap_or(0.0);
            }
        }
        Ok(self.sparse(index, example.weight() * bound))
    }

    fn gradient_norm_bound(
        &self, engine: &mut E, example: &Example, index: usize,
    ) -> DispatchResult<Array1<f64>> {
        engine.load_values(&self.layout.structural_ones())?;
        engine.compute_viterbi(Pass::Plain)?;
        let Some(best) = engine.viterbi_score().value() else {
            self.warn_invalid(example, "gradient_norm_bound");
            return Ok(self.sparse(index, 0.0));
        };
        Ok(self.sparse(index, 2.0 * example.weight() * best))
    }

    fn loss(
        &self, engine: &mut E, example: &Example, index: usize, weights: &Array1<f64>, lb: f64,
        decoding: Decoding,
    ) -> DispatchResult<Array1<f64>> {
        let truth = self.truth(example)?;
        self.load_weights(engine, weights, lb)?;
        let predicted = self.decode(engine, decoding)?;

        engine.load_values(&Array1::zeros(self.layout.dim()))?;
        engine.use_constraints(&predicted)?;
        engine.use_loss(truth, lb)?;
        engine.compute_viterbi(Pass::Plain)?;
        let Some(score) = engine.viterbi_score().value() else {
            self.warn_invalid(example, "loss");
            return Ok(self.sparse(index, 0.0));
        };
        Ok(self.sparse(index, example.weight() * score / lb))
    }

    // ---- Structural objectives ----

    fn function_gradient(
        &self, engine: &mut E, example: &Example, weights: &Array1<f64>, lb: f64,
        toggles: ObjectiveToggles, conditional: Conditional,
    ) -> DispatchResult<Array1<f64>> {
        let dim = self.layout.dim();
        let truth = match conditional {
            Conditional::Truth => Some(self.truth(example)?),
            Conditional::TruthOrExpected => example.truth(),
        };
        self.load_weights(engine, weights, lb)?;
        if let (true, Some(truth)) = (toggles.use_loss, truth) {
            engine.use_loss(truth, lb)?;
        }

        let uncond = self.structural_pass(engine, Pass::Plain, toggles.nonsmooth)?;
        let cond = match truth {
            Some(truth) => {
                engine.use_constraints(truth)?;
                self.structural_pass(engine, Pass::Plain, toggles.nonsmooth)?
            }
            None => {
                engine.update_evidence_structures()?;
                let ess = self.structural_pass(engine, Pass::Ess, toggles.nonsmooth)?;
                let scaled = self.layout.rescale(weights, lb);
                let structural = scaled.slice(s![..self.layout.n_structural()]);
                let score = match ess.score {
                    Score::Valid(_) => Score::Valid(structural.dot(&ess.counts)),
                    Score::Invalid => Score::Invalid,
                };
                PassResult { score, counts: ess.counts }
            }
        };

        let (Some(u), Some(c)) = (uncond.score.value(), cond.score.value()) else {
            self.warn_invalid(example, "function_gradient");
            return Ok(Array1::zeros(dim + 1));
        };
        if c - u > INVARIANT_REL_TOL * u.abs().max(1.0) {
            return Err(DispatchError::InvariantViolation {
                example: example.name().to_string(),
                unconditional: u,
                conditional: c,
            });
        }
        let value = example.weight() * (u - c) / lb;
        if value < -ROUNDOFF_TOL {
            return Err(DispatchError::PrecisionViolation {
                example: example.name().to_string(),
                value,
                params: weights.clone(),
            });
        }
        let gradient = self.padded(&((&uncond.counts - &cond.counts) * example.weight()));
        Ok(self.dense(gradient, clamp_roundoff(value, ROUNDOFF_TOL)))
    }

    fn function_gradient_se(
        &self, engine: &mut E, example: &Example, weights: &Array1<f64>, lb: f64,
        toggles: ObjectiveToggles, hyperparam_data: f64,
    ) -> DispatchResult<Array1<f64>> {
        if !(hyperparam_data.is_finite() && hyperparam_data >= 0.0) {
            return Err(DispatchError::InvalidHyperparamData { value: hyperparam_data });
        }
        let dim = self.layout.dim();
        let truth = example.truth();
        let weight = example.weight() * if truth.is_some() { 1.0 } else { hyperparam_data };
        self.load_weights(engine, weights, lb)?;
        engine.update_evidence_structures()?;
        if toggles.use_loss {
            if let Some(truth) = truth {
                engine.use_loss(truth, lb)?;
            }
        }

        let uncond = self.structural_pass(engine, Pass::Plain, toggles.nonsmooth)?;
        if let Some(truth) = truth {
            engine.use_constraints(truth)?;
        }
        let cond = self.structural_pass(engine, Pass::Ess, toggles.nonsmooth)?;

        let (Some(u), Some(c)) = (uncond.score.value(), cond.score.value()) else {
            self.warn_invalid(example, "function_gradient_se");
            return Ok(Array1::zeros(dim + 1));
        };
        let value = weight * (u - c) / lb;
        let mut gradient = self.padded(&((&uncond.counts - &cond.counts) * weight));

        for cell in self.layout.evidence_cells() {
            let exclude_zeros = example.has_zero_evidence(cell.channel, cell.source);
            let counts =
                engine.gamma_counts(cell.channel, cell.source, Some(cell.state), exclude_zeros)?;
            if counts.count == 0.0 {
                continue;
            }
            let (k, theta) = self.layout.gamma_parameters(weights, cell)?;
            let (d_shape, d_scale) = log_param_gradient(&counts, k, theta);
            gradient[self.layout.logical_index(cell, GammaParam::LogShape)?] -= weight * d_shape / lb;
            gradient[self.layout.logical_index(cell, GammaParam::LogScale)?] -= weight * d_scale / lb;
        }
        Ok(self.dense(gradient, value))
    }

    fn hessian_vector_product(
        &self, engine: &mut E, example: &Example, weights: &Array1<f64>, direction: &Array1<f64>,
        lb: f64, toggles: ObjectiveToggles,
    ) -> DispatchResult<Array1<f64>> {
        if toggles.nonsmooth {
            return Err(DispatchError::NonsmoothHessian);
        }
        let dim = self.layout.dim();
        let grad = |w: &Array1<f64>| -> DispatchResult<Array1<f64>> {
            engine.load_sequence(example)?;
            let fg = self.function_gradient(engine, example, w, lb, toggles, Conditional::Truth)?;
            Ok(fg.slice(s![..dim]).to_owned())
        };
        hessian_vector_product(grad, weights, direction, HVP_STEP)
    }

    // ---- Evidence statistics ----

    /// Leave state marginals of the current model in `engine`: exact from a
    /// clamped pass when the truth is known, posterior otherwise.
    fn evidence_marginals(
        &self, engine: &mut E, example: &Example, weights: &Array1<f64>, lb: f64,
    ) -> DispatchResult<bool> {
        self.load_weights(engine, weights, lb)?;
        let score = match example.truth() {
            Some(truth) => {
                engine.use_constraints(truth)?;
                engine.compute_viterbi(Pass::Plain)?;
                engine.viterbi_score()
            }
            None => {
                engine.update_evidence_structures()?;
                engine.compute_inside(Pass::Ess)?;
                let score = engine.log_partition();
                if score.is_valid() {
                    engine.compute_outside(Pass::Ess)?;
                }
                score
            }
        };
        Ok(score.is_valid())
    }

    fn cell_counts(
        &self, engine: &mut E, example: &Example, weights: &Array1<f64>, lb: f64,
        cell: EvidenceCell, command: &'static str,
    ) -> DispatchResult<Option<GammaCounts>> {
        self.layout.logical_index(cell, GammaParam::LogShape)?;
        if !self.evidence_marginals(engine, example, weights, lb)? {
            self.warn_invalid(example, command);
            return Ok(None);
        }
        let exclude_zeros = example.has_zero_evidence(cell.channel, cell.source);
        Ok(Some(engine.gamma_counts(cell.channel, cell.source, Some(cell.state), exclude_zeros)?))
    }

    fn gamma_mle(
        &self, engine: &mut E, example: &Example, weights: &Array1<f64>, lb: f64,
        cell: EvidenceCell, scale: f64,
    ) -> DispatchResult<Array1<f64>> {
        if !(scale.is_finite() && scale > 0.0) {
            return Err(DispatchError::InvalidDataScale { value: scale });
        }
        let Some(counts) = self.cell_counts(engine, example, weights, lb, cell, "gamma_mle")? else {
            return Ok(Array1::zeros(4));
        };
        let counts = rebase(counts, scale);
        // θ is stored in data units; the rebased statistics need θ / scale.
        let (k, theta) = self.layout.gamma_parameters(weights, cell)?;
        let ll = log_likelihood(&counts, k, theta / scale);
        let w = example.weight();
        Ok(Array1::from(vec![w * counts.sum, w * counts.sum_log, w * counts.count, w * ll]))
    }

    fn gamma_scaling_factor(
        &self, engine: &mut E, example: &Example, weights: &Array1<f64>, lb: f64,
        cell: EvidenceCell,
    ) -> DispatchResult<Array1<f64>> {
        let Some(counts) =
            self.cell_counts(engine, example, weights, lb, cell, "gamma_scaling_factor")?
        else {
            return Ok(Array1::zeros(2));
        };
        let w = example.weight();
        Ok(Array1::from(vec![w * counts.sum, w * counts.count]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        corpus::{EvidenceTrack, PAIRED, UNPAIRED},
        engine::NussinovEngine,
    };
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use rand::{Rng, SeedableRng, rngs::StdRng};

    // -------------------------------------------------------------------------
    // Scope
    // -----
    // These tests drive the dispatcher with the reference engine on small
    // hand-built corpora: objective ordering, degenerate examples, log-base
    // rescaling, loss and bound commands, evidence statistics, the
    // evidence-augmented gradient and Hessian-vector products.
    // -------------------------------------------------------------------------

    fn dispatcher(examples: Vec<Example>, channels: usize) -> Dispatcher<NussinovEngine> {
        let layout = Arc::new(NussinovEngine::default_layout(channels, 1));
        let engine = NussinovEngine::new(layout.clone()).expect("engine");
        Dispatcher::new(Corpus::new(examples), layout, engine).expect("dispatcher")
    }

    fn supervised(name: &str, seq: &str, db: &str) -> Example {
        Example::supervised(name, seq, Structure::from_dot_bracket(db).expect("structure"))
            .expect("example")
    }

    fn fg(weights: Array1<f64>, nonsmooth: bool) -> Command {
        Command::FunctionGradient { weights, toggles: ObjectiveToggles { nonsmooth, use_loss: false } }
    }

    #[test]
    // Purpose
    // -------
    // The structural objective is non-negative for random weights in both the
    // smooth and non-smooth forms.
    //
    // Given
    // -----
    // - Three supervised examples and 50 seeded random weight vectors.
    //
    // Expect
    // ------
    // - Every per-example value is ≥ 0 and no invariant error is raised.
    fn objective_is_nonnegative_for_random_weights() {
        // Arrange
        let d = dispatcher(
            vec![
                supervised("a", "GGGAAACCC", "(((...)))"),
                supervised("b", "GCAUAAAGUGC", "((.(...).))"),
                supervised("c", "AUGCAAAGCAU", "((((...))))"),
            ],
            0,
        );
        let mut engine = d.engine();
        let mut rng = StdRng::seed_from_u64(11);
        let dim = d.layout().dim();

        for _ in 0..50 {
            let w = Array1::from_shape_fn(dim, |_| rng.gen_range(-2.0..2.0));
            for nonsmooth in [false, true] {
                let request = Request::unscaled(fg(w.clone(), nonsmooth));
                for index in 0..3 {
                    // Act
                    let out = d.evaluate(&mut engine, &request, index).expect("evaluate");

                    // Assert
                    assert!(out[dim] >= 0.0);
                }
            }
        }
    }

    #[test]
    // Purpose
    // -------
    // A length-1 example admits a single structure, so the objective and
    // gradient vanish at zero weights.
    fn single_position_example_has_zero_objective() {
        // Arrange
        let d = dispatcher(vec![supervised("one", "A", ".")], 0);
        let mut engine = d.engine();
        let dim = d.layout().dim();
        let request = Request::unscaled(fg(Array1::zeros(dim), false));

        // Act
        let out = d.evaluate(&mut engine, &request, 0).expect("evaluate");

        // Assert
        assert!(out.iter().all(|&x| x == 0.0));
    }

    #[test]
    // Purpose
    // -------
    // A truth the engine cannot parse yields an all-zero result rather than
    // an error or a sentinel value.
    //
    // Given
    // -----
    // - "GAAAA" annotated "(...)": G–A is not a canonical pair.
    fn unparsable_truth_zeroes_contribution() {
        // Arrange
        let d = dispatcher(vec![supervised("bad", "GAAAA", "(...)")], 0);
        let mut engine = d.engine();
        let dim = d.layout().dim();
        let request = Request::unscaled(fg(Array1::from_elem(dim, 0.3), false));

        // Act
        let out = d.evaluate(&mut engine, &request, 0).expect("evaluate");
        let parse = d.evaluate(&mut engine, &Request::unscaled(Command::CheckParsability), 0)
            .expect("parsability");

        // Assert
        assert_eq!(out, Array1::<f64>::zeros(dim + 1));
        assert_eq!(parse, Array1::from(vec![0.0]));
    }

    #[test]
    // Purpose
    // -------
    // Parsability results are sparse: only the evaluated index is set.
    fn parsability_is_sparse() {
        // Arrange
        let d = dispatcher(
            vec![supervised("bad", "GAAAA", "(...)"), supervised("good", "GAAAC", "(...)")],
            0,
        );
        let mut engine = d.engine();
        let request = Request::unscaled(Command::CheckParsability);

        // Act
        let bad = d.evaluate(&mut engine, &request, 0).expect("bad");
        let good = d.evaluate(&mut engine, &request, 1).expect("good");

        // Assert
        assert_eq!(bad, Array1::from(vec![0.0, 0.0]));
        assert_eq!(good, Array1::from(vec![0.0, 1.0]));
    }

    #[test]
    // Purpose
    // -------
    // Rescaling identity: `f(w, lb) · lb == f(lb·w, 1)` and the gradient is
    // the same feature-count difference in both cases.
    fn log_base_rescaling_identity() {
        // Arrange
        let d = dispatcher(vec![supervised("a", "GGGAAACCC", "(((...)))")], 0);
        let mut engine = d.engine();
        let dim = d.layout().dim();
        let w = Array1::from_shape_fn(dim, |j| 0.1 * (j as f64) - 0.4);
        let lb = 2.5;

        // Act
        let scaled = d
            .evaluate(&mut engine, &Request::new(lb, fg(w.clone(), false)).expect("request"), 0)
            .expect("scaled");
        let direct = d
            .evaluate(&mut engine, &Request::unscaled(fg(&w * lb, false)), 0)
            .expect("direct");

        // Assert
        assert_relative_eq!(scaled[dim] * lb, direct[dim], max_relative = 1e-10);
        for j in 0..dim {
            assert_abs_diff_eq!(scaled[j], direct[j], epsilon = 1e-10);
        }
    }

    #[test]
    // Purpose
    // -------
    // The analytic structural gradient agrees with a central difference of
    // the objective value.
    fn structural_gradient_matches_central_difference() {
        // Arrange
        let d = dispatcher(vec![supervised("b", "GCAUAAAGUGC", "((.(...).))")], 0);
        let mut engine = d.engine();
        let dim = d.layout().dim();
        let w = Array1::from_shape_fn(dim, |j| 0.05 * (j as f64) - 0.2);
        let h = 1e-5;
        let value = |engine: &mut NussinovEngine, w: Array1<f64>| {
            d.evaluate(engine, &Request::unscaled(fg(w, false)), 0).expect("value")[dim]
        };

        // Act
        let out = d.evaluate(&mut engine, &Request::unscaled(fg(w.clone(), false)), 0).expect("fg");

        // Assert
        for j in 0..dim {
            let mut plus = w.clone();
            plus[j] += h;
            let mut minus = w.clone();
            minus[j] -= h;
            let fd = (value(&mut engine, plus) - value(&mut engine, minus)) / (2.0 * h);
            assert_abs_diff_eq!(out[j], fd, epsilon = 1e-6);
        }
    }

    #[test]
    // Purpose
    // -------
    // Hessian-vector products are refused under the non-smooth objective and
    // match a difference of analytic gradients otherwise.
    fn hessian_vector_product_behaviour() {
        // Arrange
        let d = dispatcher(vec![supervised("a", "GGGAAACCC", "(((...)))")], 0);
        let mut engine = d.engine();
        let dim = d.layout().dim();
        let w = Array1::from_elem(dim, 0.1);
        let v = Array1::from_shape_fn(dim, |j| if j % 2 == 0 { 1.0 } else { -0.5 });
        let hvp = |nonsmooth| Command::HessianVectorProduct {
            weights: w.clone(),
            direction: v.clone(),
            toggles: ObjectiveToggles { nonsmooth, use_loss: false },
        };

        // Act
        let err = d.evaluate(&mut engine, &Request::unscaled(hvp(true)), 0).unwrap_err();
        let hv = d.evaluate(&mut engine, &Request::unscaled(hvp(false)), 0).expect("hvp");

        // Assert
        assert_eq!(err, DispatchError::NonsmoothHessian);
        let eps = 1e-4;
        let g_plus = d
            .evaluate(&mut engine, &Request::unscaled(fg(&w + &(&v * eps), false)), 0)
            .expect("plus");
        let g_minus = d
            .evaluate(&mut engine, &Request::unscaled(fg(&w - &(&v * eps), false)), 0)
            .expect("minus");
        for j in 0..dim {
            let reference = (g_plus[j] - g_minus[j]) / (2.0 * eps);
            assert_abs_diff_eq!(hv[j], reference, epsilon = 1e-4);
        }
    }

    #[test]
    // Purpose
    // -------
    // Loss under Viterbi decoding counts disagreeing positions, descaled by
    // `log_base` and scaled by the example weight.
    //
    // Given
    // -----
    // - "GAAAC" with truth "(...)"; weights strongly favour unpaired A/G/C so
    //   Viterbi predicts "....." (2 disagreeing positions).
    // - log_base 2 and example weight 1.5.
    //
    // Expect
    // ------
    // - Loss entry 1.5 · 2 = 3.
    fn loss_counts_disagreements() {
        // Arrange
        let truth = Structure::from_dot_bracket("(...)").expect("structure");
        let ex = Example::new("l", "GAAAC", Some(truth), Vec::new(), 1.5).expect("example");
        let d = dispatcher(vec![ex], 0);
        let mut engine = d.engine();
        let mut w = Array1::zeros(d.layout().dim());
        w[3] = -5.0;
        let request = Request::new(
            2.0,
            Command::Loss { weights: w, decoding: Decoding::Viterbi },
        )
        .expect("request");

        // Act
        let out = d.evaluate(&mut engine, &request, 0).expect("loss");

        // Assert
        assert_abs_diff_eq!(out[0], 3.0, epsilon = 1e-12);
    }

    #[test]
    // Purpose
    // -------
    // Gradient-norm bound is twice the weighted Viterbi score at unit weights.
    //
    // Given
    // -----
    // - "GAAAC": at unit weights the all-unpaired structure scores 5 and
    //   beats the hairpin (1 for the pair + 3 for the loop).
    fn gradient_norm_bound_uses_unit_weights() {
        // Arrange
        let d = dispatcher(vec![supervised("g", "GAAAC", "(...)")], 0);
        let mut engine = d.engine();

        // Act
        let out = d.evaluate(&mut engine, &Request::unscaled(Command::GradientNormBound), 0)
            .expect("bound");

        // Assert
        assert_abs_diff_eq!(out[0], 10.0, epsilon = 1e-12);
    }

    #[test]
    // Purpose
    // -------
    // Gamma statistics on a clamped example: exact per-state counts,
    // rebasing, and the zero-observation flag.
    //
    // Given
    // -----
    // - "GAAAC" with truth "(...)"; unpaired observations {1, 2, 3} at the
    //   three A's and a zero at a paired position.
    //
    // Expect
    // ------
    // - Unpaired cell with scale 2: Σd = 3, Σlog d = ln 6 − 3 ln 2, N = 3.
    // - Scaling factor of the unpaired cell: (6, 3).
    // - `FindZeros` flags the example.
    fn gamma_statistics_on_clamped_example() {
        // Arrange
        let track = EvidenceTrack::new(0, 0, vec![Some(0.0), Some(1.0), Some(2.0), Some(3.0), None]);
        let truth = Structure::from_dot_bracket("(...)").expect("structure");
        let ex = Example::new("e", "GAAAC", Some(truth), vec![track], 1.0).expect("example");
        let d = dispatcher(vec![ex], 1);
        let mut engine = d.engine();
        let w = Array1::zeros(d.layout().dim());
        let cell = EvidenceCell::new(0, UNPAIRED, 0);

        // Act
        let stats = d
            .evaluate(
                &mut engine,
                &Request::unscaled(Command::GammaMle { weights: w.clone(), cell, scale: 2.0 }),
                0,
            )
            .expect("stats");
        let factor = d
            .evaluate(&mut engine, &Request::unscaled(Command::GammaScalingFactor { weights: w, cell }), 0)
            .expect("factor");
        let zeros = d
            .evaluate(&mut engine, &Request::unscaled(Command::FindZeros { channel: 0, source: 0 }), 0)
            .expect("zeros");

        // Assert
        assert_abs_diff_eq!(stats[0], 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(stats[1], 6f64.ln() - 3.0 * 2f64.ln(), epsilon = 1e-12);
        assert_abs_diff_eq!(stats[2], 3.0, epsilon = 1e-12);
        let rebased = GammaCounts { sum: 3.0, sum_log: stats[1], count: 3.0 };
        assert_abs_diff_eq!(stats[3], log_likelihood(&rebased, 1.0, 0.5), epsilon = 1e-12);
        assert_eq!(factor, Array1::from(vec![6.0, 3.0]));
        assert_eq!(zeros, Array1::from(vec![1.0]));
    }

    #[test]
    // Purpose
    // -------
    // The evidence-augmented gradient matches central differences in every
    // coordinate, structural and evidence, for an unsupervised example.
    fn se_gradient_matches_central_difference() {
        // Arrange
        let track = EvidenceTrack::new(
            0,
            0,
            vec![Some(0.4), Some(1.2), Some(0.7), None, Some(2.5), Some(0.9), Some(1.1), Some(0.3), Some(1.6)],
        );
        let ex = Example::new("u", "GGGAAACCC", None, vec![track], 1.0).expect("example");
        let d = dispatcher(vec![ex], 1);
        let mut engine = d.engine();
        let dim = d.layout().dim();
        let w = Array1::from_shape_fn(dim, |j| 0.03 * (j as f64) - 0.1);
        let se = |w: Array1<f64>| Command::FunctionGradientSe {
            weights: w,
            toggles: ObjectiveToggles::smooth(),
            hyperparam_data: 0.8,
        };
        let h = 1e-5;

        // Act
        let out = d.evaluate(&mut engine, &Request::unscaled(se(w.clone())), 0).expect("se");

        // Assert
        for j in 0..dim {
            let mut plus = w.clone();
            plus[j] += h;
            let mut minus = w.clone();
            minus[j] -= h;
            let f_plus = d.evaluate(&mut engine, &Request::unscaled(se(plus)), 0).expect("plus")[dim];
            let f_minus = d.evaluate(&mut engine, &Request::unscaled(se(minus)), 0).expect("minus")[dim];
            assert_abs_diff_eq!(out[j], (f_plus - f_minus) / (2.0 * h), epsilon = 1e-5);
        }
        // Paired and unpaired cells both receive gradient mass.
        let layout = d.layout();
        for state in [UNPAIRED, PAIRED] {
            let idx = layout
                .logical_index(EvidenceCell::new(0, state, 0), GammaParam::LogScale)
                .expect("index");
            assert!(out[idx] != 0.0);
        }
    }

    #[test]
    // Purpose
    // -------
    // Commands needing a ground truth refuse unsupervised examples, while the
    // EM objective falls back to expected statistics.
    fn missing_truth_handling() {
        // Arrange
        let ex = Example::new("u", "GGGAAACCC", None, Vec::new(), 1.0).expect("example");
        let d = dispatcher(vec![ex], 0);
        let mut engine = d.engine();
        let dim = d.layout().dim();
        let w = Array1::from_elem(dim, 0.2);

        // Act
        let err = d.evaluate(&mut engine, &Request::unscaled(fg(w.clone(), false)), 0).unwrap_err();
        let em = d
            .evaluate(
                &mut engine,
                &Request::unscaled(Command::EmFunctionGradient {
                    weights: w,
                    toggles: ObjectiveToggles::smooth(),
                }),
                0,
            )
            .expect("em");

        // Assert
        assert!(matches!(err, DispatchError::MissingGroundTruth { .. }));
        // log Z ≥ E[s] (Gibbs inequality) so the EM value is non-negative.
        assert!(em[dim] >= 0.0);
        assert_eq!(em.len(), dim + 1);
    }
}

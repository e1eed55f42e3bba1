//! training::options — validated configuration for inner and outer runs.
//!
//! Purpose
//! -------
//! Collect every knob of a training run in one serializable value so a run
//! can be described by a JSON file and reproduced exactly (including the
//! mini-batch RNG seed).
//!
//! Key behaviors
//! -------------
//! - [`LbfgsConfig`] is the serializable mirror of
//!   [`LbfgsOptions`]; [`LbfgsConfig::to_options`] runs the optimizer-layer
//!   validation.
//! - [`EmOptions`] and [`SgdOptions`] have validating constructors and
//!   documented defaults.
//! - [`TrainingOptions::from_json`] parses and validates in one step; missing
//!   fields take their defaults.
//!
//! Invariants & assumptions
//! ------------------------
//! - The implicit outer gradient needs the L-BFGS inner strategy and a smooth
//!   training objective; [`TrainingOptions::validate`] rejects other pairings.
//! - The EM strategy only offers single iterations, so an outer search over
//!   it is rejected up front.
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::{
    dispatch::{ObjectiveToggles, Parallelism},
    optimization::objective_optimizer::{LbfgsOptions, LineSearcher, Tolerances},
    training::errors::{TrainError, TrainResult},
};

fn positive(field: &'static str, value: f64) -> TrainResult<()> {
    if !(value.is_finite() && value > 0.0) {
        return Err(TrainError::InvalidOptions { field, reason: "must be finite and > 0" });
    }
    Ok(())
}

/// Serializable L-BFGS settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LbfgsConfig {
    pub tol_grad: Option<f64>,
    pub tol_cost: Option<f64>,
    pub max_iter: Option<usize>,
    pub line_searcher: LineSearcher,
    pub lbfgs_mem: Option<usize>,
    pub verbose: bool,
}

impl Default for LbfgsConfig {
    fn default() -> Self {
        Self {
            tol_grad: Some(1e-5),
            tol_cost: None,
            max_iter: Some(200),
            line_searcher: LineSearcher::MoreThuente,
            lbfgs_mem: None,
            verbose: false,
        }
    }
}

impl LbfgsConfig {
    /// # Errors
    /// Tolerance and memory validation failures from the optimizer layer.
    pub fn to_options(&self) -> TrainResult<LbfgsOptions> {
        let tols = Tolerances::new(self.tol_grad, self.tol_cost, self.max_iter)?;
        Ok(LbfgsOptions::new(tols, self.line_searcher, self.verbose, self.lbfgs_mem)?)
    }
}

/// Structural M-step settings of the EM hybrid.
///
/// The step starts at `initial_step` and is halved until the sufficient
/// decrease condition holds, at most `max_backtracks` times.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmOptions {
    pub initial_step: f64,
    pub max_backtracks: usize,
}

impl Default for EmOptions {
    fn default() -> Self {
        Self { initial_step: 1.0, max_backtracks: 30 }
    }
}

impl EmOptions {
    /// # Errors
    /// [`TrainError::InvalidOptions`] for a non-positive step or zero backtracks.
    pub fn new(initial_step: f64, max_backtracks: usize) -> TrainResult<Self> {
        let opts = Self { initial_step, max_backtracks };
        opts.validate()?;
        Ok(opts)
    }

    pub fn validate(&self) -> TrainResult<()> {
        positive("em.initial_step", self.initial_step)?;
        if self.max_backtracks == 0 {
            return Err(TrainError::InvalidOptions {
                field: "em.max_backtracks",
                reason: "must be at least 1",
            });
        }
        Ok(())
    }
}

/// Stochastic-gradient settings.
///
/// Step size at iteration `t` is `s0 / (1 + t)^s1`. Examples without a
/// ground truth are weighted by `hyperparam_data`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SgdOptions {
    pub batch_size: usize,
    pub max_iterations: usize,
    pub s0: f64,
    pub s1: f64,
    pub seed: u64,
    pub hyperparam_data: f64,
}

impl Default for SgdOptions {
    fn default() -> Self {
        Self { batch_size: 10, max_iterations: 100, s0: 0.1, s1: 0.5, seed: 0, hyperparam_data: 1.0 }
    }
}

impl SgdOptions {
    /// # Errors
    /// [`TrainError::InvalidOptions`] naming the first offending field.
    pub fn new(
        batch_size: usize, max_iterations: usize, s0: f64, s1: f64, seed: u64, hyperparam_data: f64,
    ) -> TrainResult<Self> {
        let opts = Self { batch_size, max_iterations, s0, s1, seed, hyperparam_data };
        opts.validate()?;
        Ok(opts)
    }

    pub fn validate(&self) -> TrainResult<()> {
        if self.batch_size == 0 {
            return Err(TrainError::InvalidOptions {
                field: "sgd.batch_size",
                reason: "must be at least 1",
            });
        }
        if self.max_iterations == 0 {
            return Err(TrainError::InvalidOptions {
                field: "sgd.max_iterations",
                reason: "must be at least 1",
            });
        }
        positive("sgd.s0", self.s0)?;
        if !(self.s1.is_finite() && self.s1 >= 0.0) {
            return Err(TrainError::InvalidOptions { field: "sgd.s1", reason: "must be finite and >= 0" });
        }
        if !(self.hyperparam_data.is_finite() && self.hyperparam_data >= 0.0) {
            return Err(TrainError::InvalidOptions {
                field: "sgd.hyperparam_data",
                reason: "must be finite and >= 0",
            });
        }
        Ok(())
    }
}

/// Which inner optimizer fits the weights for a fixed regularization.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum InnerStrategy {
    Lbfgs(LbfgsConfig),
    Sgd(SgdOptions),
    /// Single EM steps are available; a full EM minimization is not.
    Em(EmOptions),
}

impl Default for InnerStrategy {
    fn default() -> Self {
        InnerStrategy::Lbfgs(LbfgsConfig::default())
    }
}

impl InnerStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            InnerStrategy::Lbfgs(_) => "lbfgs",
            InnerStrategy::Sgd(_) => "sgd",
            InnerStrategy::Em(_) => "em",
        }
    }
}

/// Estimator of the holdout objective's gradient with respect to `log C`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum OuterGradient {
    /// Implicit differentiation through the inner optimum: one conjugate
    /// gradient solve on Hessian-vector products per outer gradient.
    Implicit { cg_tol: f64, cg_max_iter: usize },
    /// Central differences of re-optimized holdout values.
    FiniteDifference { step: f64 },
}

impl Default for OuterGradient {
    fn default() -> Self {
        OuterGradient::Implicit { cg_tol: 1e-6, cg_max_iter: 100 }
    }
}

impl OuterGradient {
    pub fn validate(&self) -> TrainResult<()> {
        match *self {
            OuterGradient::Implicit { cg_tol, cg_max_iter } => {
                positive("outer.gradient.cg_tol", cg_tol)?;
                if cg_max_iter == 0 {
                    return Err(TrainError::InvalidOptions {
                        field: "outer.gradient.cg_max_iter",
                        reason: "must be at least 1",
                    });
                }
                Ok(())
            }
            OuterGradient::FiniteDifference { step } => positive("outer.gradient.step", step),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OuterOptions {
    pub gradient: OuterGradient,
    pub lbfgs: LbfgsConfig,
}

/// Error for an outer search over the EM strategy, which has no full
/// minimization.
pub(crate) fn em_search_unsupported() -> TrainError {
    TrainError::InvalidOptions {
        field: "inner",
        reason: "the EM strategy cannot drive the outer search",
    }
}

/// Complete description of a training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingOptions {
    /// Scale applied to structural weights before inference.
    pub log_base: f64,
    pub parallelism: Parallelism,
    /// Toggles of the inner training objective.
    pub toggles: ObjectiveToggles,
    pub inner: InnerStrategy,
    pub outer: OuterOptions,
    /// Where `<example>.params` dumps go before a precision failure is returned.
    pub diagnostics_dir: PathBuf,
}

impl Default for TrainingOptions {
    fn default() -> Self {
        Self {
            log_base: 1.0,
            parallelism: Parallelism::default(),
            toggles: ObjectiveToggles::smooth(),
            inner: InnerStrategy::default(),
            outer: OuterOptions::default(),
            diagnostics_dir: PathBuf::from("."),
        }
    }
}

impl TrainingOptions {
    /// Parse JSON and validate.
    ///
    /// # Errors
    /// [`TrainError::MalformedOptions`] for unparsable input, then any
    /// [`Self::validate`] failure.
    pub fn from_json(text: &str) -> TrainResult<Self> {
        let opts: Self = serde_json::from_str(text)
            .map_err(|e| TrainError::MalformedOptions { text: e.to_string() })?;
        opts.validate()?;
        Ok(opts)
    }

    pub fn to_json(&self) -> TrainResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| TrainError::MalformedOptions { text: e.to_string() })
    }

    /// # Errors
    /// - [`TrainError::InvalidOptions`] for out-of-range fields.
    /// - [`TrainError::ImplicitGradientUnsupported`] when the implicit outer
    ///   gradient is paired with a non-L-BFGS inner strategy.
    /// - [`TrainError::InvalidOptions`] on `inner` for the EM strategy, whatever
    ///   the outer gradient.
    /// - Optimizer-layer errors for invalid L-BFGS settings.
    pub fn validate(&self) -> TrainResult<()> {
        positive("log_base", self.log_base)?;
        match &self.inner {
            InnerStrategy::Lbfgs(cfg) => {
                cfg.to_options()?;
            }
            InnerStrategy::Sgd(opts) => opts.validate()?,
            InnerStrategy::Em(opts) => {
                opts.validate()?;
                return Err(em_search_unsupported());
            }
        }
        self.outer.gradient.validate()?;
        self.outer.lbfgs.to_options()?;
        if let OuterGradient::Implicit { .. } = self.outer.gradient {
            if !matches!(self.inner, InnerStrategy::Lbfgs(_)) {
                return Err(TrainError::ImplicitGradientUnsupported { strategy: self.inner.name() });
            }
            if self.toggles.nonsmooth {
                return Err(TrainError::InvalidOptions {
                    field: "toggles.nonsmooth",
                    reason: "implicit gradients need the smooth objective",
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimization::errors::OptError;

    // -------------------------------------------------------------------------
    // Scope
    // -----
    // These tests cover JSON loading with defaults, range validation and the
    // pairing rules between inner strategies and outer gradient estimators.
    // -------------------------------------------------------------------------

    #[test]
    // Purpose
    // -------
    // Missing fields take defaults and explicit ones override them.
    //
    // Given
    // -----
    // - JSON naming only the SGD strategy, a finite-difference outer
    //   gradient and a log base.
    //
    // Expect
    // ------
    // - The named fields are set and everything else is default.
    fn from_json_fills_defaults() {
        // Arrange
        let text = r#"{
            "log_base": 0.5,
            "inner": { "Sgd": { "batch_size": 4, "seed": 7 } },
            "outer": { "gradient": { "FiniteDifference": { "step": 0.01 } } }
        }"#;

        // Act
        let opts = TrainingOptions::from_json(text).expect("options should parse");

        // Assert
        assert_eq!(opts.log_base, 0.5);
        assert_eq!(opts.parallelism, Parallelism::Rayon);
        assert_eq!(opts.diagnostics_dir, PathBuf::from("."));
        match opts.inner {
            InnerStrategy::Sgd(sgd) => {
                assert_eq!(sgd.batch_size, 4);
                assert_eq!(sgd.seed, 7);
                assert_eq!(sgd.max_iterations, SgdOptions::default().max_iterations);
            }
            other => panic!("unexpected strategy {other:?}"),
        }
        assert_eq!(opts.outer.gradient, OuterGradient::FiniteDifference { step: 0.01 });
        assert_eq!(opts.outer.lbfgs, LbfgsConfig::default());
    }

    #[test]
    // Purpose
    // -------
    // Serialized options load back unchanged.
    fn json_output_loads_back() {
        // Arrange
        let opts = TrainingOptions::default();

        // Act
        let text = opts.to_json().expect("serialize");
        let back = TrainingOptions::from_json(&text).expect("parse");

        // Assert
        assert_eq!(back, opts);
    }

    #[test]
    // Purpose
    // -------
    // Invalid pairings and ranges are rejected with specific errors.
    //
    // Expect
    // ------
    // - Implicit gradient with SGD: `ImplicitGradientUnsupported`.
    // - Implicit gradient with the non-smooth objective: `InvalidOptions`.
    // - Zero L-BFGS max_iter: the optimizer-layer error.
    // - Garbage JSON: `MalformedOptions`.
    fn validate_rejects_bad_configurations() {
        // Arrange
        let sgd = TrainingOptions {
            inner: InnerStrategy::Sgd(SgdOptions::default()),
            ..TrainingOptions::default()
        };
        let nonsmooth = TrainingOptions {
            toggles: ObjectiveToggles { nonsmooth: true, use_loss: false },
            ..TrainingOptions::default()
        };
        let zero_iter = TrainingOptions {
            inner: InnerStrategy::Lbfgs(LbfgsConfig { max_iter: Some(0), ..LbfgsConfig::default() }),
            ..TrainingOptions::default()
        };
        let em_fd = TrainingOptions {
            inner: InnerStrategy::Em(EmOptions::default()),
            outer: OuterOptions {
                gradient: OuterGradient::FiniteDifference { step: 0.01 },
                ..OuterOptions::default()
            },
            ..TrainingOptions::default()
        };
        let em_implicit = TrainingOptions {
            inner: InnerStrategy::Em(EmOptions::default()),
            ..TrainingOptions::default()
        };

        // Act / Assert
        for em in [&em_fd, &em_implicit] {
            assert!(matches!(em.validate(), Err(TrainError::InvalidOptions { field: "inner", .. })));
        }
        assert_eq!(
            sgd.validate(),
            Err(TrainError::ImplicitGradientUnsupported { strategy: "sgd" })
        );
        assert!(matches!(
            nonsmooth.validate(),
            Err(TrainError::InvalidOptions { field: "toggles.nonsmooth", .. })
        ));
        assert!(matches!(
            zero_iter.validate(),
            Err(TrainError::Optimization(OptError::InvalidMaxIter { max_iter: 0, .. }))
        ));
        assert!(matches!(
            TrainingOptions::from_json("{ not json"),
            Err(TrainError::MalformedOptions { .. })
        ));
    }

    #[test]
    // Purpose
    // -------
    // Validating constructors check each field.
    fn constructors_validate_fields() {
        assert!(SgdOptions::new(0, 10, 0.1, 0.5, 0, 1.0).is_err());
        assert!(SgdOptions::new(2, 10, 0.1, -0.5, 0, 1.0).is_err());
        assert!(SgdOptions::new(2, 10, 0.1, 0.5, 0, -1.0).is_err());
        assert!(SgdOptions::new(2, 10, 0.1, 0.5, 0, 0.0).is_ok());
        assert!(EmOptions::new(0.0, 5).is_err());
        assert!(EmOptions::new(1.0, 0).is_err());
        assert!(OuterGradient::FiniteDifference { step: -1.0 }.validate().is_err());
    }
}

//! training::inner — fitting weights for a fixed regularization.
//!
//! Purpose
//! -------
//! Define the [`InnerOptimizer`] seam the outer search drives, the
//! L2-regularized training objective shared by the strategies, and the
//! L-BFGS strategy ([`LbfgsInner`]) that fully minimizes it.
//!
//! Key behaviors
//! -------------
//! - Regularization strengths arrive per group (`C`, one entry per
//!   regularization group) and are expanded to one entry per parameter by
//!   the layout; evidence parameters are never penalized.
//! - The objective is `F(w) + ½ Σ_j c_j w_j²` with gradient `∇F(w) + c ∘ w`.
//! - Dispatch failures raised inside argmin callbacks are parked in a
//!   `RefCell` slot and surfaced as the original [`TrainError::Dispatch`].
use std::cell::RefCell;

use ndarray::Array1;
use tracing::info;

use crate::{
    dispatch::{DispatchError, ObjectiveToggles},
    engine::InferenceEngine,
    optimization::{
        errors::{OptError, OptResult},
        objective_optimizer::{
            Cost, Grad, LbfgsOptions, Objective, Theta, minimize, validation::validate_theta,
        },
    },
    oracle::ComputationOracle,
    training::errors::{TrainError, TrainResult},
};

/// Weights found by an inner run and the regularized objective there.
#[derive(Debug, Clone, PartialEq)]
pub struct InnerSolution {
    pub weights: Array1<f64>,
    pub value: f64,
}

/// Strategy fitting the weights for per-group regularization strengths `c`.
pub trait InnerOptimizer {
    fn name(&self) -> &'static str;

    /// Toggles of the training objective this strategy minimizes.
    fn toggles(&self) -> ObjectiveToggles;

    /// Training units the strategy fits on.
    fn units(&self) -> &[usize];

    /// Whether the returned weights are a stationary point of the regularized
    /// standard objective, which implicit hyperparameter gradients rely on.
    fn reaches_standard_optimum(&self) -> bool {
        false
    }

    fn minimize(&self, initial: &Array1<f64>, c: &Array1<f64>) -> TrainResult<InnerSolution>;
}

/// `½ Σ c_j w_j²`.
pub fn penalty(c_full: &Array1<f64>, w: &Array1<f64>) -> f64 {
    0.5 * (c_full * w * w).sum()
}

/// Per-parameter strengths from per-group `c`, rejecting non-positive entries.
///
/// # Errors
/// - [`DispatchError::InvalidRegularization`] for a non-finite or
///   non-positive strength.
/// - Layout dimension errors for a `c` of the wrong length.
pub fn expand_regularization<E: InferenceEngine>(
    oracle: &ComputationOracle<E>, c: &Array1<f64>,
) -> TrainResult<Array1<f64>> {
    if let Some(&bad) = c.iter().find(|v| !(v.is_finite() && **v > 0.0)) {
        return Err(DispatchError::InvalidRegularization { value: bad }.into());
    }
    Ok(oracle.distributor().dispatcher().layout().expand_hyperparameters(c)?)
}

/// Regularized standard objective over a fixed set of training units.
pub struct RegularizedObjective<'a, E: InferenceEngine> {
    oracle: &'a ComputationOracle<E>,
    c_full: Array1<f64>,
    toggles: ObjectiveToggles,
    failure: RefCell<Option<DispatchError>>,
}

impl<'a, E: InferenceEngine> RegularizedObjective<'a, E> {
    pub fn new(
        oracle: &'a ComputationOracle<E>, c_full: Array1<f64>, toggles: ObjectiveToggles,
    ) -> Self {
        Self { oracle, c_full, toggles, failure: RefCell::new(None) }
    }

    fn park(&self, err: DispatchError) -> OptError {
        let text = err.to_string();
        let mut slot = self.failure.borrow_mut();
        if slot.is_none() {
            *slot = Some(err);
        }
        OptError::ObjectiveFailed { text }
    }

    /// The parked dispatch error if one occurred, else `err` itself.
    pub fn into_error(self, err: OptError) -> TrainError {
        match self.failure.into_inner() {
            Some(dispatch) => TrainError::Dispatch(dispatch),
            None => TrainError::Optimization(err),
        }
    }
}

impl<'a, E: InferenceEngine> Objective for RegularizedObjective<'a, E> {
    type Data = Vec<usize>;

    fn value(&self, theta: &Theta, units: &Vec<usize>) -> OptResult<Cost> {
        let f = self.oracle.compute_function(units, theta, self.toggles).map_err(|e| self.park(e))?;
        Ok(f + penalty(&self.c_full, theta))
    }

    fn check(&self, theta: &Theta, _units: &Vec<usize>) -> OptResult<()> {
        validate_theta(theta, self.c_full.len())
    }

    fn grad(&self, theta: &Theta, units: &Vec<usize>) -> OptResult<Grad> {
        let g = self.oracle.compute_gradient(units, theta, self.toggles).map_err(|e| self.park(e))?;
        Ok(g + &self.c_full * theta)
    }
}

/// Full L-BFGS minimization of the regularized standard objective.
pub struct LbfgsInner<'a, E: InferenceEngine> {
    oracle: &'a ComputationOracle<E>,
    units: Vec<usize>,
    toggles: ObjectiveToggles,
    options: LbfgsOptions,
}

impl<'a, E: InferenceEngine> LbfgsInner<'a, E> {
    pub fn new(
        oracle: &'a ComputationOracle<E>, units: Vec<usize>, toggles: ObjectiveToggles,
        options: LbfgsOptions,
    ) -> Self {
        Self { oracle, units, toggles, options }
    }
}

impl<'a, E: InferenceEngine> InnerOptimizer for LbfgsInner<'a, E> {
    fn name(&self) -> &'static str {
        "lbfgs"
    }

    fn toggles(&self) -> ObjectiveToggles {
        self.toggles
    }

    fn units(&self) -> &[usize] {
        &self.units
    }

    fn reaches_standard_optimum(&self) -> bool {
        true
    }

    fn minimize(&self, initial: &Array1<f64>, c: &Array1<f64>) -> TrainResult<InnerSolution> {
        let c_full = expand_regularization(self.oracle, c)?;
        let objective = RegularizedObjective::new(self.oracle, c_full, self.toggles);
        let outcome = match minimize(&objective, initial.clone(), &self.units, &self.options, "inner")
        {
            Ok(outcome) => outcome,
            Err(err) => return Err(objective.into_error(err)),
        };
        info!(
            value = outcome.value,
            iterations = outcome.iterations,
            converged = outcome.converged,
            status = outcome.status.as_str(),
            "inner L-BFGS finished"
        );
        Ok(InnerSolution { weights: outcome.theta_hat, value: outcome.value })
    }
}

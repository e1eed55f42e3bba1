//! training::outer — quasi-Newton search over log regularization strengths.
//!
//! Purpose
//! -------
//! Choose per-group regularization strengths `C = exp(log_C)` by minimizing
//! the holdout objective of the inner optimum:
//! `g(log_C) = F_holdout(w*(C))`, where `w*(C)` is the inner strategy's
//! solution on the training units started from fixed initial weights.
//!
//! Key behaviors
//! -------------
//! - [`HyperparameterSearch`] implements the crate's [`Objective`] over
//!   `log_C`, so the outer search reuses the same argmin L-BFGS runner as the
//!   inner fit.
//! - The most recent inner solution is memoized by the bits of `log_C`; the
//!   value and gradient at one point share a single inner run.
//! - Gradients come from [`OuterGradient`]:
//!   - `Implicit`: with `H` the Hessian of the regularized training
//!     objective at `w*`, solve `H u = ∇F_holdout(w*)` by conjugate gradient
//!     on Hessian-vector products, then
//!     `∂g/∂log C_k = −C_k Σ_{j ∈ group k} u_j w*_j`.
//!   - `FiniteDifference`: central differences of re-optimized holdout values.
//!
//! Invariants & assumptions
//! ------------------------
//! - The holdout objective is the smooth, loss-free standard objective.
//! - Implicit gradients need an inner strategy that reaches a stationary
//!   point of the regularized standard objective with smooth toggles.
//!
//! Downstream usage
//! ----------------
//! - Built by [`crate::training::pipeline::train`] from `TrainingOptions`,
//!   or directly for custom inner strategies.
use std::cell::RefCell;

use ndarray::Array1;
use tracing::{info, warn};

use crate::{
    dispatch::{DispatchError, ObjectiveToggles},
    engine::{Decoding, InferenceEngine},
    optimization::{
        errors::{OptError, OptResult},
        numerical_stability::safe_exp,
        objective_optimizer::{
            Cost, Grad, LbfgsOptions, Objective, Theta, linear_solve::conjugate_gradient, minimize,
            validation::validate_theta,
        },
    },
    oracle::ComputationOracle,
    training::{
        errors::{TrainError, TrainResult},
        inner::{InnerOptimizer, InnerSolution, expand_regularization},
        options::OuterGradient,
    },
};

/// Result of the outer search.
#[derive(Debug, Clone, PartialEq)]
pub struct OuterSolution {
    pub log_c: Array1<f64>,
    pub weights: Array1<f64>,
    /// Holdout objective at `weights`.
    pub value: f64,
    pub iterations: usize,
    pub converged: bool,
}

pub struct HyperparameterSearch<'a, E: InferenceEngine, I: InnerOptimizer> {
    oracle: &'a ComputationOracle<E>,
    inner: I,
    initial_w: Array1<f64>,
    holdout: Vec<usize>,
    gradient: OuterGradient,
    holdout_decoding: Option<Decoding>,
    solution: RefCell<Option<(Vec<u64>, InnerSolution)>>,
    failure: RefCell<Option<TrainError>>,
}

impl<'a, E: InferenceEngine, I: InnerOptimizer> HyperparameterSearch<'a, E, I> {
    /// The training set is the inner strategy's own units, so the implicit
    /// gradient's Hessian is taken over exactly the fitted examples.
    ///
    /// # Errors
    /// - [`TrainError::EmptyUnits`] for an empty training or holdout set.
    /// - [`TrainError::ImplicitGradientUnsupported`] when the implicit
    ///   gradient is requested for a strategy that does not minimize the
    ///   regularized standard objective.
    /// - [`DispatchError::NonsmoothHessian`] for implicit gradients with
    ///   non-smooth training toggles.
    /// - Dimension errors for `initial_w`.
    pub fn new(
        oracle: &'a ComputationOracle<E>, inner: I, initial_w: Array1<f64>, holdout: Vec<usize>,
        gradient: OuterGradient,
    ) -> TrainResult<Self> {
        if inner.units().is_empty() {
            return Err(TrainError::EmptyUnits { set: "training" });
        }
        if holdout.is_empty() {
            return Err(TrainError::EmptyUnits { set: "holdout" });
        }
        gradient.validate()?;
        if let OuterGradient::Implicit { .. } = gradient {
            if !inner.reaches_standard_optimum() {
                return Err(TrainError::ImplicitGradientUnsupported { strategy: inner.name() });
            }
            if inner.toggles().nonsmooth {
                return Err(DispatchError::NonsmoothHessian.into());
            }
        }
        oracle.distributor().dispatcher().layout().check_dim(&initial_w)?;
        Ok(Self {
            oracle,
            inner,
            initial_w,
            holdout,
            gradient,
            holdout_decoding: None,
            solution: RefCell::new(None),
            failure: RefCell::new(None),
        })
    }

    /// Also log the holdout decoding loss after every inner solve.
    pub fn with_holdout_decoding(mut self, decoding: Decoding) -> Self {
        self.holdout_decoding = Some(decoding);
        self
    }

    pub fn n_groups(&self) -> usize {
        self.oracle.distributor().dispatcher().layout().n_groups()
    }

    /// Inner solution at `log_c`, reusing the last one for identical bits.
    pub fn solve(&self, log_c: &Array1<f64>) -> TrainResult<InnerSolution> {
        let key: Vec<u64> = log_c.iter().map(|v| v.to_bits()).collect();
        if let Some((stored, sol)) = &*self.solution.borrow() {
            if *stored == key {
                return Ok(sol.clone());
            }
        }
        let c = log_c.mapv(safe_exp);
        let sol = self.inner.minimize(&self.initial_w, &c)?;
        info!(log_c = ?log_c.to_vec(), inner_value = sol.value, "inner solve");
        *self.solution.borrow_mut() = Some((key, sol.clone()));
        Ok(sol)
    }

    fn holdout_value(&self, w: &Array1<f64>) -> TrainResult<f64> {
        let value = self.oracle.compute_function(&self.holdout, w, ObjectiveToggles::smooth())?;
        if let Some(decoding) = self.holdout_decoding {
            let loss = self.oracle.compute_loss(&self.holdout, w, decoding)?;
            info!(value, loss, ?decoding, "holdout evaluation");
        }
        Ok(value)
    }

    /// `g(log_C)`: holdout objective at the inner optimum.
    pub fn evaluate(&self, log_c: &Array1<f64>) -> TrainResult<f64> {
        let sol = self.solve(log_c)?;
        self.holdout_value(&sol.weights)
    }

    /// `∇g(log_C)` with the configured estimator.
    pub fn gradient(&self, log_c: &Array1<f64>) -> TrainResult<Array1<f64>> {
        match self.gradient {
            OuterGradient::Implicit { cg_tol, cg_max_iter } => {
                self.implicit_gradient(log_c, cg_tol, cg_max_iter)
            }
            OuterGradient::FiniteDifference { step } => self.finite_difference_gradient(log_c, step),
        }
    }

    fn implicit_gradient(
        &self, log_c: &Array1<f64>, cg_tol: f64, cg_max_iter: usize,
    ) -> TrainResult<Array1<f64>> {
        let c = log_c.mapv(safe_exp);
        let c_full = expand_regularization(self.oracle, &c)?;
        let w = self.solve(log_c)?.weights;
        let rhs = self.oracle.compute_gradient(&self.holdout, &w, ObjectiveToggles::smooth())?;
        let toggles = self.inner.toggles();

        let apply = |v: &Array1<f64>| -> TrainResult<Array1<f64>> {
            let hv = self.oracle.compute_hessian_vector_product(self.inner.units(), &w, v, toggles)?;
            Ok(hv + &c_full * v)
        };
        let cg = conjugate_gradient(apply, &rhs, cg_tol, cg_max_iter)?;
        if !cg.converged {
            warn!(
                iterations = cg.iterations,
                residual = cg.residual_norm,
                "conjugate gradient stopped before tolerance"
            );
        }

        let layout = self.oracle.distributor().dispatcher().layout();
        let mut grad = Array1::zeros(c.len());
        for j in 0..layout.n_structural() {
            if let Some(group) = layout.group_of(j) {
                grad[group] -= cg.x[j] * w[j];
            }
        }
        Ok(grad * &c)
    }

    fn finite_difference_gradient(&self, log_c: &Array1<f64>, step: f64) -> TrainResult<Array1<f64>> {
        let mut grad = Array1::zeros(log_c.len());
        for k in 0..log_c.len() {
            let mut plus = log_c.clone();
            plus[k] += step;
            let mut minus = log_c.clone();
            minus[k] -= step;
            grad[k] = (self.evaluate(&plus)? - self.evaluate(&minus)?) / (2.0 * step);
        }
        Ok(grad)
    }

    fn park(&self, err: TrainError) -> OptError {
        let text = err.to_string();
        let mut slot = self.failure.borrow_mut();
        if slot.is_none() {
            *slot = Some(err);
        }
        OptError::ObjectiveFailed { text }
    }

    /// Run L-BFGS over `log_C` from `log_c0` and refit at the best point.
    ///
    /// # Errors
    /// The first inner or dispatch failure raised during the search, else
    /// optimizer errors.
    pub fn search(&self, log_c0: &Array1<f64>, opts: &LbfgsOptions) -> TrainResult<OuterSolution> {
        let outcome = match minimize(self, log_c0.clone(), &(), opts, "outer") {
            Ok(outcome) => outcome,
            Err(err) => {
                return Err(self.failure.borrow_mut().take().unwrap_or(TrainError::Optimization(err)));
            }
        };
        let sol = self.solve(&outcome.theta_hat)?;
        info!(
            log_c = ?outcome.theta_hat.to_vec(),
            value = outcome.value,
            iterations = outcome.iterations,
            status = outcome.status.as_str(),
            "outer search finished"
        );
        Ok(OuterSolution {
            log_c: outcome.theta_hat,
            weights: sol.weights,
            value: outcome.value,
            iterations: outcome.iterations,
            converged: outcome.converged,
        })
    }
}

impl<'a, E: InferenceEngine, I: InnerOptimizer> Objective for HyperparameterSearch<'a, E, I> {
    type Data = ();

    fn value(&self, theta: &Theta, _data: &()) -> OptResult<Cost> {
        self.evaluate(theta).map_err(|e| self.park(e))
    }

    fn check(&self, theta: &Theta, _data: &()) -> OptResult<()> {
        validate_theta(theta, self.n_groups())
    }

    fn grad(&self, theta: &Theta, _data: &()) -> OptResult<Grad> {
        self.gradient(theta).map_err(|e| self.park(e))
    }
}

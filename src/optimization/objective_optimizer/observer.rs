//! Iteration reporting for argmin runs through `tracing`.
use argmin::core::{observers::Observe, Error, IterState, State, KV};
use argmin_math::ArgminL2Norm;

use crate::optimization::objective_optimizer::types::{Cost, Grad, Theta};

/// Argmin observer that emits one `tracing` event per solver iteration.
///
/// `label` distinguishes nested runs (e.g. the inner parameter fit versus the
/// outer hyperparameter search) in the log stream.
#[derive(Debug, Clone)]
pub struct TracingObserver {
    label: &'static str,
}

impl TracingObserver {
    pub fn new(label: &'static str) -> Self {
        Self { label }
    }
}

impl Observe<IterState<Theta, Grad, (), (), (), Cost>> for TracingObserver {
    fn observe_init(
        &mut self, name: &str, _state: &IterState<Theta, Grad, (), (), (), Cost>, _kv: &KV,
    ) -> Result<(), Error> {
        tracing::info!(run = self.label, solver = name, "starting optimizer");
        Ok(())
    }

    fn observe_iter(
        &mut self, state: &IterState<Theta, Grad, (), (), (), Cost>, _kv: &KV,
    ) -> Result<(), Error> {
        let grad_norm = state.get_gradient().map(|g| g.l2_norm());
        tracing::info!(
            run = self.label,
            iter = state.get_iter(),
            cost = state.get_cost(),
            best_cost = state.get_best_cost(),
            grad_norm = ?grad_norm,
            "optimizer iteration"
        );
        Ok(())
    }
}

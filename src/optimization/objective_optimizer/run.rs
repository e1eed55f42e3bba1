//! Execution helper that runs an `argmin` solver on an [`Objective`] and
//! returns a crate-friendly [`OptimOutcome`].
use crate::optimization::{
    errors::OptResult,
    objective_optimizer::{
        Grad, LbfgsOptions, Objective, OptimOutcome, Theta, adapter::ArgMinAdapter,
        observer::TracingObserver,
    },
};
use argmin::core::{observers::ObserverMode, CostFunction, Executor, IterState, Solver, State};

/// Run an `argmin` optimization for an objective.
///
/// Wires up the problem via [`ArgMinAdapter`], the chosen solver, the
/// initial parameter `theta0`, an optional [`TracingObserver`] (when
/// `opts.verbose`) and the optional `max_iters`, then executes the solver and
/// converts the final state into [`OptimOutcome`].
///
/// # Errors
/// - Propagates any `argmin` runtime error (solver errors, line-search
///   failures, objective failures) via `From<argmin::core::Error>`.
/// - Propagates validation errors raised while building [`OptimOutcome`].
pub fn run_lbfgs<'a, F, S>(
    theta0: Theta, opts: &LbfgsOptions, problem: ArgMinAdapter<'a, F>, solver: S,
    label: &'static str,
) -> OptResult<OptimOutcome>
where
    F: Objective,
    S: Solver<ArgMinAdapter<'a, F>, IterState<Theta, Grad, (), (), (), f64>> + Send + 'static,
{
    if opts.verbose {
        let c0 = problem.cost(&theta0)?;
        tracing::info!(run = label, cost = c0, dim = theta0.len(), "initial state");
    }
    let mut optimizer = Executor::new(problem, solver);
    optimizer = optimizer.configure(|state| state.param(theta0));
    if opts.verbose {
        optimizer = optimizer.add_observer(TracingObserver::new(label), ObserverMode::Always);
    }
    if let Some(max_iter) = opts.tols.max_iter {
        optimizer = optimizer.configure(|state| state.max_iters(max_iter as u64));
    }

    let mut result = optimizer.run()?.state().clone();
    let iterations = result.get_iter();
    let function_counts = result.get_func_counts().clone();
    let termination = result.get_termination_status().clone();
    let grad = result.take_gradient();
    OptimOutcome::new(
        result.take_best_param(),
        result.get_best_cost(),
        termination,
        iterations,
        function_counts,
        grad,
    )
}

//! End-to-end training driven by [`TrainingOptions`].
use std::sync::Arc;

use ndarray::Array1;
use tracing::info;

use crate::{
    corpus::{Corpus, ParameterLayout},
    dispatch::{Dispatcher, Distributor},
    engine::InferenceEngine,
    oracle::ComputationOracle,
    training::{
        errors::TrainResult,
        inner::{InnerOptimizer, LbfgsInner},
        options::{InnerStrategy, TrainingOptions, em_search_unsupported},
        outer::{HyperparameterSearch, OuterSolution},
        sgd::SgdInner,
    },
};

/// Oracle over `corpus` configured by `options` (log base, fan-out and the
/// directory receiving parameter dumps).
///
/// # Errors
/// Option validation and dispatcher construction failures.
pub fn build_oracle<E: InferenceEngine>(
    corpus: Corpus, layout: Arc<ParameterLayout>, engine: E, options: &TrainingOptions,
) -> TrainResult<ComputationOracle<E>> {
    options.validate()?;
    let dispatcher = Dispatcher::new(corpus, layout, engine)?;
    let distributor = Distributor::new(dispatcher, options.parallelism);
    let oracle = ComputationOracle::new(distributor, options.log_base)?;
    Ok(oracle.with_diagnostics_dir(options.diagnostics_dir.clone()))
}

/// Drop unparsable examples from both sets, then search `log_C` from
/// `log_c0` with the configured inner strategy.
///
/// # Errors
/// - [`TrainError::EmptyUnits`](crate::training::TrainError::EmptyUnits) if
///   filtering empties a set.
/// - Any inner, outer or dispatch failure.
pub fn train<E: InferenceEngine>(
    oracle: &ComputationOracle<E>, training: &[usize], holdout: &[usize],
    initial_w: &Array1<f64>, log_c0: &Array1<f64>, options: &TrainingOptions,
) -> TrainResult<OuterSolution> {
    options.validate()?;
    let training = oracle.filter_nonparsable(training)?;
    let holdout = oracle.filter_nonparsable(holdout)?;
    info!(
        training = training.len(),
        holdout = holdout.len(),
        strategy = options.inner.name(),
        "starting hyperparameter search"
    );

    match options.inner {
        InnerStrategy::Lbfgs(cfg) => {
            let inner = LbfgsInner::new(oracle, training, options.toggles, cfg.to_options()?);
            search(oracle, inner, holdout, initial_w, log_c0, options)
        }
        InnerStrategy::Sgd(sgd) => {
            let inner = SgdInner::new(oracle, training, options.toggles, sgd)?;
            search(oracle, inner, holdout, initial_w, log_c0, options)
        }
        InnerStrategy::Em(_) => Err(em_search_unsupported()),
    }
}

fn search<E: InferenceEngine, I: InnerOptimizer>(
    oracle: &ComputationOracle<E>, inner: I, holdout: Vec<usize>, initial_w: &Array1<f64>,
    log_c0: &Array1<f64>, options: &TrainingOptions,
) -> TrainResult<OuterSolution> {
    let search =
        HyperparameterSearch::new(oracle, inner, initial_w.clone(), holdout, options.outer.gradient)?;
    let lbfgs = options.outer.lbfgs.to_options()?;
    search.search(log_c0, &lbfgs)
}

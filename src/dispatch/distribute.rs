//! Batch fan-out: evaluate one request over many examples and sum the results.
//!
//! Each worker owns a cloned engine, so no engine instance is ever shared
//! between two examples in flight. Per-example results are collected in unit
//! order before the reduction, which keeps sums deterministic regardless of
//! the thread schedule.
use ndarray::Array1;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    dispatch::{command::Request, dispatcher::Dispatcher, errors::DispatchResult},
    engine::InferenceEngine,
};

/// How a batch is spread over workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Parallelism {
    /// One engine, examples in order on the calling thread.
    Sequential,
    /// Rayon's global pool, one engine per worker.
    #[default]
    Rayon,
}

#[derive(Debug, Clone)]
pub struct Distributor<E: InferenceEngine> {
    dispatcher: Dispatcher<E>,
    parallelism: Parallelism,
}

impl<E: InferenceEngine> Distributor<E> {
    pub fn new(dispatcher: Dispatcher<E>, parallelism: Parallelism) -> Self {
        Self { dispatcher, parallelism }
    }

    pub fn dispatcher(&self) -> &Dispatcher<E> {
        &self.dispatcher
    }

    pub fn parallelism(&self) -> Parallelism {
        self.parallelism
    }

    /// Elementwise sum of the per-example results of `request` over `units`.
    ///
    /// An empty batch returns the zero vector of the command's result length.
    ///
    /// # Errors
    /// The first per-example error in unit order.
    pub fn run(&self, request: &Request, units: &[usize]) -> DispatchResult<Array1<f64>> {
        let d = &self.dispatcher;
        let len = request.command.result_len(d.corpus().len(), d.layout().dim());
        debug!(command = request.command.name(), units = units.len(), "dispatching batch");

        let results: Vec<DispatchResult<Array1<f64>>> = match self.parallelism {
            Parallelism::Sequential => {
                let mut engine = d.engine();
                units.iter().map(|&unit| d.evaluate(&mut engine, request, unit)).collect()
            }
            Parallelism::Rayon => units
                .par_iter()
                .map_init(|| d.engine(), |engine, &unit| d.evaluate(engine, request, unit))
                .collect(),
        };

        let mut total = Array1::zeros(len);
        for result in results {
            total += &result?;
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        corpus::{Corpus, Example, Structure},
        dispatch::command::{Command, ObjectiveToggles},
        engine::NussinovEngine,
    };
    use approx::assert_abs_diff_eq;
    use std::sync::Arc;

    // -------------------------------------------------------------------------
    // Scope
    // -----
    // These tests cover batch reduction: sequential and rayon fan-out agree,
    // sparse results land at their own indices, and empty batches are zero.
    // -------------------------------------------------------------------------

    fn distributor(parallelism: Parallelism) -> Distributor<NussinovEngine> {
        let example = |name: &str, seq: &str, db: &str| {
            Example::supervised(name, seq, Structure::from_dot_bracket(db).expect("structure"))
                .expect("example")
        };
        let examples = vec![
            example("a", "GGGAAACCC", "(((...)))"),
            example("b", "GAAAA", "(...)"),
            example("c", "GCAUAAAGUGC", "((.(...).))"),
        ];
        let layout = Arc::new(NussinovEngine::default_layout(0, 1));
        let engine = NussinovEngine::new(layout.clone()).expect("engine");
        let dispatcher = Dispatcher::new(Corpus::new(examples), layout, engine).expect("dispatcher");
        Distributor::new(dispatcher, parallelism)
    }

    #[test]
    // Purpose
    // -------
    // Rayon fan-out produces the same sum as the sequential path.
    fn rayon_matches_sequential() {
        // Arrange
        let seq = distributor(Parallelism::Sequential);
        let par = distributor(Parallelism::Rayon);
        let dim = seq.dispatcher().layout().dim();
        let w = Array1::from_shape_fn(dim, |j| 0.1 * j as f64 - 0.3);
        let request = Request::unscaled(Command::FunctionGradient {
            weights: w,
            toggles: ObjectiveToggles::smooth(),
        });

        // Act
        let a = seq.run(&request, &[0, 1, 2]).expect("sequential");
        let b = par.run(&request, &[0, 1, 2]).expect("rayon");

        // Assert
        for (x, y) in a.iter().zip(b.iter()) {
            assert_abs_diff_eq!(*x, *y, epsilon = 1e-12);
        }
    }

    #[test]
    // Purpose
    // -------
    // Sparse parsability flags are summed without interference and an empty
    // batch yields zeros of the corpus length.
    fn sparse_results_sum_per_index() {
        // Arrange
        let dist = distributor(Parallelism::Rayon);
        let request = Request::unscaled(Command::CheckParsability);

        // Act
        let flags = dist.run(&request, &[0, 1, 2]).expect("flags");
        let empty = dist.run(&request, &[]).expect("empty");

        // Assert
        assert_eq!(flags, Array1::from(vec![1.0, 0.0, 1.0]));
        assert_eq!(empty, Array1::<f64>::zeros(3));
    }
}

//! High-level entry point for minimizing an [`Objective`].
//!
//! Selects an L-BFGS solver with either Hager–Zhang or More–Thuente line
//! search, wraps the objective in an `ArgMinAdapter` and delegates the run to
//! `run_lbfgs`.
use crate::optimization::{
    errors::OptResult,
    objective_optimizer::{
        OptimOutcome, Theta,
        adapter::ArgMinAdapter,
        builders::{build_optimizer_hager_zhang, build_optimizer_more_thuente},
        run::run_lbfgs,
        traits::{LbfgsOptions, LineSearcher, Objective},
    },
};

/// Minimize `c(θ)` using L-BFGS with the chosen line search.
///
/// # Behavior
/// - Validates the initial guess via `f.check(theta0, data)`.
/// - Builds the solver according to `opts.line_searcher`.
/// - Runs it; `label` tags the `tracing` events of this run.
///
/// # Errors
/// - Propagates any error from `f.check`.
/// - Propagates builder errors and runtime errors from `run_lbfgs`.
pub fn minimize<F: Objective>(
    f: &F, theta0: Theta, data: &F::Data, opts: &LbfgsOptions, label: &'static str,
) -> OptResult<OptimOutcome> {
    f.check(&theta0, data)?;
    let problem = ArgMinAdapter::new(f, data);
    match opts.line_searcher {
        LineSearcher::MoreThuente => {
            let solver = build_optimizer_more_thuente(opts)?;
            run_lbfgs(theta0, opts, problem, solver, label)
        }
        LineSearcher::HagerZhang => {
            let solver = build_optimizer_hager_zhang(opts)?;
            run_lbfgs(theta0, opts, problem, solver, label)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimization::{
        errors::{OptError, OptResult},
        objective_optimizer::{Cost, Grad, Tolerances},
    };
    use approx::assert_abs_diff_eq;
    use ndarray::{Array1, array};

    // -------------------------------------------------------------------------
    // Scope
    // -----
    // These tests run full L-BFGS solves on small convex objectives with both
    // line searches, with and without analytic gradients, and check that
    // `check` failures short-circuit the run.
    // -------------------------------------------------------------------------

    /// c(θ) = ½ Σ a_i (θ_i − b_i)²
    struct Quadratic {
        a: Array1<f64>,
        analytic: bool,
    }

    impl Objective for Quadratic {
        type Data = Array1<f64>;

        fn value(&self, theta: &Theta, b: &Array1<f64>) -> OptResult<Cost> {
            let d = theta - b;
            Ok(0.5 * (&self.a * &d * &d).sum())
        }

        fn check(&self, theta: &Theta, b: &Array1<f64>) -> OptResult<()> {
            if theta.len() != b.len() {
                return Err(OptError::ThetaLengthMismatch { expected: b.len(), actual: theta.len() });
            }
            Ok(())
        }

        fn grad(&self, theta: &Theta, b: &Array1<f64>) -> OptResult<Grad> {
            if !self.analytic {
                return Err(OptError::GradientNotImplemented);
            }
            Ok(&self.a * &(theta - b))
        }
    }

    fn options(line_searcher: LineSearcher) -> LbfgsOptions {
        let tols = Tolerances::new(Some(1e-8), None, Some(200)).expect("Tolerances should be valid");
        LbfgsOptions::new(tols, line_searcher, false, None).expect("LbfgsOptions should be valid")
    }

    #[test]
    // Purpose
    // -------
    // Both line searches reach the minimizer of a separable quadratic.
    //
    // Given
    // -----
    // - a = [1, 10, 0.5], b = [1, −2, 3], θ₀ = 0, analytic gradient.
    //
    // Expect
    // ------
    // - θ̂ ≈ b and c(θ̂) ≈ 0 for both MoreThuente and HagerZhang.
    fn minimize_reaches_quadratic_minimum_for_both_line_searches() {
        // Arrange
        let f = Quadratic { a: array![1.0, 10.0, 0.5], analytic: true };
        let b = array![1.0, -2.0, 3.0];

        for ls in [LineSearcher::MoreThuente, LineSearcher::HagerZhang] {
            // Act
            let out = minimize(&f, Array1::zeros(3), &b, &options(ls), "test")
                .expect("minimize should succeed");

            // Assert
            for i in 0..3 {
                assert_abs_diff_eq!(out.theta_hat[i], b[i], epsilon = 1e-5);
            }
            assert!(out.value < 1e-9, "{ls:?} left cost {}", out.value);
        }
    }

    #[test]
    // Purpose
    // -------
    // The finite-difference fallback is good enough to solve the same problem.
    //
    // Given
    // -----
    // - The quadratic above without an analytic gradient.
    //
    // Expect
    // ------
    // - θ̂ ≈ b within finite-difference accuracy.
    fn minimize_uses_finite_differences_without_gradient() {
        // Arrange
        let f = Quadratic { a: array![2.0, 1.0], analytic: false };
        let b = array![0.5, -1.5];

        // Act
        let out = minimize(&f, array![3.0, 3.0], &b, &options(LineSearcher::MoreThuente), "test")
            .expect("minimize should succeed");

        // Assert
        assert_abs_diff_eq!(out.theta_hat[0], 0.5, epsilon = 1e-4);
        assert_abs_diff_eq!(out.theta_hat[1], -1.5, epsilon = 1e-4);
    }

    #[test]
    // Purpose
    // -------
    // A failing `check` stops the run before any solver work.
    //
    // Given
    // -----
    // - θ₀ of length 2 against data of length 3.
    //
    // Expect
    // ------
    // - `OptError::ThetaLengthMismatch`.
    fn minimize_propagates_check_failure() {
        // Arrange
        let f = Quadratic { a: array![1.0, 1.0, 1.0], analytic: true };
        let b = array![0.0, 0.0, 0.0];

        // Act
        let err = minimize(&f, Array1::zeros(2), &b, &options(LineSearcher::HagerZhang), "test")
            .expect_err("length mismatch must fail");

        // Assert
        assert_eq!(err, OptError::ThetaLengthMismatch { expected: 3, actual: 2 });
    }
}

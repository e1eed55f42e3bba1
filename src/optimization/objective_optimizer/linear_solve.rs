//! Matrix-free conjugate gradient for symmetric positive-definite systems.
//!
//! The operator is only available through products `A v` (typically a
//! finite-difference Hessian-vector product plus a diagonal), so the solver
//! takes a closure rather than a matrix.
use crate::optimization::{
    errors::OptError,
    objective_optimizer::{Grad, Theta},
};

/// Outcome of a conjugate-gradient solve.
#[derive(Debug, Clone, PartialEq)]
pub struct CgSolution {
    pub x: Theta,
    pub iterations: usize,
    pub residual_norm: f64,
    pub converged: bool,
}

/// Solve `A x = b` starting from `x₀ = 0`.
///
/// Stops when `‖r‖ ≤ tol · max(1, ‖b‖)` or after `max_iter` iterations. The
/// error type of `apply` is preserved.
///
/// # Errors
/// - `OptError::RhsDimMismatch` if `apply` returns a vector of the wrong length.
/// - `OptError::NonPositiveCurvature` when `pᵀ A p ≤ 0`.
/// - Any error returned by `apply`.
pub fn conjugate_gradient<F, E>(
    mut apply: F, b: &Grad, tol: f64, max_iter: usize,
) -> Result<CgSolution, E>
where
    F: FnMut(&Theta) -> Result<Grad, E>,
    E: From<OptError>,
{
    let n = b.len();
    let mut x = Theta::zeros(n);
    let mut r = b.clone();
    let mut p = r.clone();
    let mut rs_old = r.dot(&r);
    let threshold = tol * b.dot(b).sqrt().max(1.0);

    if rs_old.sqrt() <= threshold {
        return Ok(CgSolution { x, iterations: 0, residual_norm: rs_old.sqrt(), converged: true });
    }
    for iteration in 0..max_iter {
        let ap = apply(&p)?;
        if ap.len() != n {
            return Err(OptError::RhsDimMismatch { expected: n, found: ap.len() }.into());
        }
        let curvature = p.dot(&ap);
        if !(curvature > 0.0) {
            return Err(OptError::NonPositiveCurvature { iteration, curvature }.into());
        }
        let alpha = rs_old / curvature;
        x.scaled_add(alpha, &p);
        r.scaled_add(-alpha, &ap);
        let rs_new = r.dot(&r);
        if rs_new.sqrt() <= threshold {
            return Ok(CgSolution {
                x,
                iterations: iteration + 1,
                residual_norm: rs_new.sqrt(),
                converged: true,
            });
        }
        let beta = rs_new / rs_old;
        p = &r + &(p * beta);
        rs_old = rs_new;
    }
    Ok(CgSolution { x, iterations: max_iter, residual_norm: rs_old.sqrt(), converged: false })
}

//! objective_optimizer::finite_diff — derivative approximations around a point.
//!
//! Purpose
//! -------
//! Provide the two finite-difference products the training layers need
//! without depending on the `finitediff` API directly:
//! - [`hessian_vector_product`]: `H v ≈ (∇f(θ + εv) − ∇f(θ − εv)) / 2ε`
//!   from any gradient oracle;
//! - [`central_gradient`]: a central-difference gradient of a fallible
//!   scalar function, used to sanity-check analytic gradients.
//!
//! Invariants & assumptions
//! ------------------------
//! - Errors raised by the wrapped function during differencing are parked in
//!   a `RefCell` slot and returned after the `finitediff` call, since its
//!   closures must return bare `f64`.
//! - Results are validated for length and finiteness before returning.
use crate::optimization::{
    errors::{OptError, OptResult},
    objective_optimizer::{Grad, Theta, validation::validate_grad},
};
use finitediff::FiniteDiff;
use std::cell::RefCell;

/// Default step for Hessian-vector products.
pub const HVP_STEP: f64 = 1e-8;

/// hessian_vector_product — central difference of a gradient along `v`.
///
/// Evaluates `grad` at `θ + εv` and `θ − εv` and returns
/// `(g₊ − g₋) / (2ε)`. The error type of `grad` is preserved so callers can
/// propagate their own domain errors.
///
/// # Errors
/// - `E::from(OptError::DirectionDimMismatch)` if `v.len() != θ.len()`.
/// - `E::from(OptError::InvalidStep)` if `ε` is not finite and positive.
/// - Any error returned by `grad`.
pub fn hessian_vector_product<F, E>(mut grad: F, theta: &Theta, v: &Theta, eps: f64) -> Result<Grad, E>
where
    F: FnMut(&Theta) -> Result<Grad, E>,
    E: From<OptError>,
{
    if v.len() != theta.len() {
        return Err(OptError::DirectionDimMismatch { expected: theta.len(), found: v.len() }.into());
    }
    if !(eps.is_finite() && eps > 0.0) {
        return Err(OptError::InvalidStep { step: eps }.into());
    }
    let plus = theta + &(v * eps);
    let minus = theta - &(v * eps);
    let g_plus = grad(&plus)?;
    let g_minus = grad(&minus)?;
    let hv = (g_plus - g_minus) / (2.0 * eps);
    validate_grad(&hv, theta.len())?;
    Ok(hv)
}

/// central_gradient — central-difference gradient of a fallible function.
///
/// # Errors
/// - The first error returned by `func` during differencing.
/// - Validation errors if the result has non-finite entries.
pub fn central_gradient<F, E>(func: F, theta: &Theta) -> Result<Grad, E>
where
    F: Fn(&Theta) -> Result<f64, E>,
    E: From<OptError>,
{
    let closure_err: RefCell<Option<E>> = RefCell::new(None);
    let wrapped = |x: &Theta| -> f64 {
        match func(x) {
            Ok(value) => value,
            Err(e) => {
                let mut slot = closure_err.borrow_mut();
                if slot.is_none() {
                    *slot = Some(e);
                }
                f64::NAN
            }
        }
    };
    let fd_grad = theta.central_diff(&wrapped);
    if let Some(err) = closure_err.into_inner() {
        return Err(err);
    }
    validate_grad(&fd_grad, theta.len())?;
    Ok(fd_grad)
}

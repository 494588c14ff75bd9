//! Numerical integration methods
//!
//! Implements the classic 4-stage Runge-Kutta scheme (RK4), both for plain
//! ODEs and for controlled systems where the forward sensitivities of the
//! end state with respect to the initial state and the (piecewise constant)
//! control are required by a multiple-shooting solver.

use nalgebra::{SMatrix, SVector};
use thiserror::Error;

use crate::dynamics::ControlledDynamics;

/// Integration errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum IntegrationError {
    #[error("Non-finite value produced at substep {substep}")]
    NonFinite { substep: usize },
    #[error("Substep count must be positive")]
    NoSubsteps,
    #[error("Interval duration must be finite and non-negative, got {0}")]
    InvalidDuration(f64),
}

/// Generic RK4 integrator for any state vector
///
/// Solves dx/dt = f(t, x) using 4th-order Runge-Kutta method.
///
/// # Arguments
/// * `x` - Current state
/// * `t` - Current time
/// * `dt` - Time step
/// * `f` - Derivative function f(t, x) -> dx/dt
///
/// # Returns
/// New state after integration
pub fn rk4<const N: usize, F>(x: &SVector<f64, N>, t: f64, dt: f64, f: F) -> SVector<f64, N>
where
    F: Fn(f64, &SVector<f64, N>) -> SVector<f64, N>,
{
    let k1 = f(t, x);
    let k2 = f(t + dt / 2.0, &(x + k1 * dt / 2.0));
    let k3 = f(t + dt / 2.0, &(x + k2 * dt / 2.0));
    let k4 = f(t + dt, &(x + k3 * dt));

    x + (k1 + k2 * 2.0 + k3 * 2.0 + k4) * (dt / 6.0)
}

/// End state of one shooting interval together with its sensitivities
#[derive(Debug, Clone, PartialEq)]
pub struct IntervalSensitivity<const NX: usize, const NU: usize> {
    /// State at the end of the interval
    pub state: SVector<f64, NX>,
    /// ∂x(t_end)/∂x(t_start)
    pub state_sensitivity: SMatrix<f64, NX, NX>,
    /// ∂x(t_end)/∂u
    pub control_sensitivity: SMatrix<f64, NX, NU>,
}

/// Advance a controlled system over one interval with constant control
///
/// The interval of length `duration` is split into `substeps` equal RK4
/// steps. Fails on the first non-finite state.
pub fn integrate_interval<M, const NX: usize, const NU: usize>(
    model: &M,
    x0: &SVector<f64, NX>,
    u: &SVector<f64, NU>,
    duration: f64,
    substeps: usize,
) -> Result<SVector<f64, NX>, IntegrationError>
where
    M: ControlledDynamics<NX, NU>,
{
    let h = substep_length(duration, substeps)?;

    let mut x = *x0;
    for substep in 0..substeps {
        x = rk4(&x, 0.0, h, |_t, state| model.derivative(state, u));
        if x.iter().any(|v| !v.is_finite()) {
            return Err(IntegrationError::NonFinite { substep });
        }
    }
    Ok(x)
}

/// Advance a controlled system over one interval and propagate sensitivities
///
/// Integrates the variational equations
///
/// ```text
/// Ġx = ∂f/∂x · Gx,            Gx(0) = I
/// Ġu = ∂f/∂x · Gu + ∂f/∂u,    Gu(0) = 0
/// ```
///
/// with the same RK4 stages as the state, so the sensitivities are exact
/// derivatives of the discrete map actually used for the state.
pub fn integrate_interval_with_sensitivities<M, const NX: usize, const NU: usize>(
    model: &M,
    x0: &SVector<f64, NX>,
    u: &SVector<f64, NU>,
    duration: f64,
    substeps: usize,
) -> Result<IntervalSensitivity<NX, NU>, IntegrationError>
where
    M: ControlledDynamics<NX, NU>,
{
    let h = substep_length(duration, substeps)?;

    let stage = |x: &SVector<f64, NX>, gx: &SMatrix<f64, NX, NX>, gu: &SMatrix<f64, NX, NU>| {
        let fx = model.state_jacobian(x, u);
        let fu = model.control_jacobian(x, u);
        (model.derivative(x, u), fx * gx, fx * gu + fu)
    };

    let mut x = *x0;
    let mut gx = SMatrix::<f64, NX, NX>::identity();
    let mut gu = SMatrix::<f64, NX, NU>::zeros();

    for substep in 0..substeps {
        let k1 = stage(&x, &gx, &gu);
        let k2 = stage(
            &(x + k1.0 * (h / 2.0)),
            &(gx + k1.1 * (h / 2.0)),
            &(gu + k1.2 * (h / 2.0)),
        );
        let k3 = stage(
            &(x + k2.0 * (h / 2.0)),
            &(gx + k2.1 * (h / 2.0)),
            &(gu + k2.2 * (h / 2.0)),
        );
        let k4 = stage(&(x + k3.0 * h), &(gx + k3.1 * h), &(gu + k3.2 * h));

        x += (k1.0 + k2.0 * 2.0 + k3.0 * 2.0 + k4.0) * (h / 6.0);
        gx += (k1.1 + k2.1 * 2.0 + k3.1 * 2.0 + k4.1) * (h / 6.0);
        gu += (k1.2 + k2.2 * 2.0 + k3.2 * 2.0 + k4.2) * (h / 6.0);

        let finite = x.iter().chain(gx.iter()).chain(gu.iter()).all(|v| v.is_finite());
        if !finite {
            return Err(IntegrationError::NonFinite { substep });
        }
    }

    Ok(IntervalSensitivity {
        state: x,
        state_sensitivity: gx,
        control_sensitivity: gu,
    })
}

fn substep_length(duration: f64, substeps: usize) -> Result<f64, IntegrationError> {
    if substeps == 0 {
        return Err(IntegrationError::NoSubsteps);
    }
    if !duration.is_finite() || duration < 0.0 {
        return Err(IntegrationError::InvalidDuration(duration));
    }
    Ok(duration / substeps as f64)
}

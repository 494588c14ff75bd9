//! Dynamics models for LMPC
//!
//! - Longitudinal ego dynamics (triple integrator driven by jerk)
//! - The [`ControlledDynamics`] seam used by the integrators

pub mod longitudinal;

pub use longitudinal::*;

use nalgebra::{SMatrix, SVector};

/// Continuous-time controlled system ẋ = f(x, u)
///
/// Implementors provide the right-hand side and both Jacobians so that
/// integrators can propagate sensitivities alongside the state.
pub trait ControlledDynamics<const NX: usize, const NU: usize> {
    /// Right-hand side f(x, u)
    fn derivative(&self, x: &SVector<f64, NX>, u: &SVector<f64, NU>) -> SVector<f64, NX>;

    /// ∂f/∂x evaluated at (x, u)
    fn state_jacobian(&self, x: &SVector<f64, NX>, u: &SVector<f64, NU>) -> SMatrix<f64, NX, NX>;

    /// ∂f/∂u evaluated at (x, u)
    fn control_jacobian(&self, x: &SVector<f64, NX>, u: &SVector<f64, NU>) -> SMatrix<f64, NX, NU>;
}

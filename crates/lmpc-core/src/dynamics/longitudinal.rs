//! Longitudinal ego dynamics
//!
//! Equations of motion along the lane:
//!
//! ```text
//! ṗ = v
//! v̇ = a
//! ȧ = j      (j: jerk, the control input)
//! ```
//!
//! The model is pure and stateless. Integrators use it to advance a node
//! state over one shooting interval under constant jerk.

use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};

use super::ControlledDynamics;
use crate::{ControlVector, StateVector};

/// Ego vehicle kinematic state
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EgoState {
    /// Position along the lane [m]
    pub position: f64,
    /// Velocity [m/s]
    pub velocity: f64,
    /// Acceleration [m/s²]
    pub acceleration: f64,
}

impl EgoState {
    /// State dimension
    pub const DIM: usize = 3;

    pub fn new(position: f64, velocity: f64, acceleration: f64) -> Self {
        Self {
            position,
            velocity,
            acceleration,
        }
    }

    /// Pack into `[position, velocity, acceleration]`
    pub fn to_vector(&self) -> StateVector {
        Vector3::new(self.position, self.velocity, self.acceleration)
    }

    pub fn from_vector(v: &StateVector) -> Self {
        Self::new(v[0], v[1], v[2])
    }

    /// Unpack from a flat slice, `None` on a dimension mismatch
    pub fn from_slice(v: &[f64]) -> Option<Self> {
        if v.len() != Self::DIM {
            return None;
        }
        Some(Self::new(v[0], v[1], v[2]))
    }

    /// True when every component is a finite number
    pub fn is_finite(&self) -> bool {
        self.position.is_finite() && self.velocity.is_finite() && self.acceleration.is_finite()
    }
}

/// Jerk-driven triple integrator
#[derive(Debug, Clone, Copy, Default)]
pub struct LongitudinalDynamics;

impl LongitudinalDynamics {
    pub fn new() -> Self {
        Self
    }

    /// State derivative for a given jerk
    pub fn state_derivative(&self, state: &EgoState, jerk: f64) -> EgoState {
        EgoState::new(state.velocity, state.acceleration, jerk)
    }
}

impl ControlledDynamics<3, 1> for LongitudinalDynamics {
    fn derivative(&self, x: &StateVector, u: &ControlVector) -> StateVector {
        self.state_derivative(&EgoState::from_vector(x), u[0]).to_vector()
    }

    fn state_jacobian(&self, _x: &StateVector, _u: &ControlVector) -> Matrix3<f64> {
        Matrix3::new(
            0.0, 1.0, 0.0,
            0.0, 0.0, 1.0,
            0.0, 0.0, 0.0,
        )
    }

    fn control_jacobian(&self, _x: &StateVector, _u: &ControlVector) -> Vector3<f64> {
        Vector3::new(0.0, 0.0, 1.0)
    }
}

//! # LMPC Core
//!
//! Vehicle-side numerics for the longitudinal follow MPC.
//!
//! This library holds everything the optimiser needs to know about how the
//! ego vehicle moves, and nothing about how it is optimised:
//!
//! ## Modules
//!
//! - [`dynamics`]: Continuous-time longitudinal model (position, velocity,
//!   acceleration driven by jerk) with analytic Jacobians
//! - [`math`]: Fixed-step explicit integrators, including RK4 with forward
//!   sensitivity propagation for multiple shooting

pub mod dynamics;
pub mod math;

use nalgebra::{SVector, Vector3};

/// Longitudinal state vector `[position, velocity, acceleration]`
pub type StateVector = Vector3<f64>;

/// Control vector `[jerk]`
pub type ControlVector = SVector<f64, 1>;

/// Gravity constant [m/s²]
///
/// Used as the fixed braking reference in the follow-distance cost.
pub const GRAVITY: f64 = 9.81;

//! Mathematical utilities for LMPC
//!
//! Fixed-step explicit integrators used by the shooting discretisation.

pub mod integrator;

pub use integrator::*;

//! LMPC Planner
//!
//! Nonlinear model predictive controller for longitudinal vehicle following.
//!
//! # Architecture
//!
//! Every control tick the controller solves a finite-horizon Optimal Control
//! Problem over a non-uniform shooting grid (fine near term, coarse far out):
//!
//! ```text
//! minimize    J = Σ ½‖r(x_k, u_k, p_k)‖²_W + ½‖r_N(x_N, p_N)‖²_{W_N}
//! subject to  x₀ = x_meas
//!             x_{k+1} = Φ(x_k, u_k, Δt_k)   (RK4 over the jerk-driven model)
//!             v_k ≥ 0
//! ```
//!
//! The residuals penalise time-to-collision risk, deviation from the desired
//! gap, acceleration and jerk. The problem is solved by Gauss-Newton SQP; each
//! QP is condensed onto the jerk sequence and solved with a dual active-set
//! method. The previous solution, shifted in time, seeds the next tick.
//!
//! # Components
//!
//! - [`config`]: Planner configuration (TOML)
//! - [`horizon`]: Non-uniform shooting grid
//! - [`cost`]: Follow residuals and their Jacobians
//! - [`ocp`]: Problem instance, rollout and linearization
//! - [`qp`]: Condensing and the dense active-set QP solver
//! - [`solver`]: Gauss-Newton SQP loop
//! - [`trajectory`]: Solution trajectory and interpolation
//! - [`constraints`]: Forward-motion check on finished trajectories
//! - [`warm_start`]: Shifted-solution cache
//! - [`controller`]: Per-tick controller with fallback handling
//! - [`scenarios`]: Canned traffic situations and closed-loop rollout

pub mod config;
pub mod constraints;
pub mod controller;
pub mod cost;
pub mod horizon;
pub mod ocp;
pub mod qp;
pub mod scenarios;
pub mod solver;
pub mod trajectory;
pub mod warm_start;

// Re-exports
pub use config::PlannerConfig;
pub use controller::{Command, Controller, ControllerState, FallbackReason, SolveStatus, TickOutput};
pub use cost::{CostModel, LeadState};
pub use horizon::Horizon;
pub use ocp::{InputError, OcpDefinition, OnlineParameters};
pub use solver::{SolveStatistics, SolverError, SqpSolver};
pub use trajectory::Trajectory;

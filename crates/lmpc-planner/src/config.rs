//! Planner configuration
//!
//! Configuration parameters for the longitudinal follow MPC. Every tuning
//! constant of the problem (grid, cost shape, weights, solver limits,
//! fallback behaviour) lives here so the solver can be exercised in
//! isolation with injected values.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: &'static str, message: String },
}

impl ConfigError {
    fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field,
            message: message.into(),
        }
    }
}

/// Main planner configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Shooting grid
    pub horizon: HorizonConfig,
    /// Shape constants of the follow-distance cost
    pub cost: CostParams,
    /// Cost function weights
    pub weights: CostWeights,
    /// Following preferences and lead model
    pub follow: FollowConfig,
    /// Solver configuration
    pub solver: SolverConfig,
    /// Degraded-mode behaviour
    pub fallback: FallbackConfig,
}

impl PlannerConfig {
    /// Parse from a TOML string and validate
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Validate configuration. Returns Err on the first invalid value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.horizon.validate()?;
        self.cost.validate()?;
        self.weights.validate()?;
        self.follow.validate()?;
        self.solver.validate()?;
        self.fallback.validate()
    }
}

/// One block of equally long shooting intervals
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HorizonSegment {
    /// Number of shooting intervals in this block
    pub intervals: usize,
    /// Interval length relative to the other blocks
    pub relative_duration: f64,
    /// RK4 substeps per interval
    pub substeps: usize,
}

/// Horizon configuration for OCP
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HorizonConfig {
    /// Total horizon time [s]
    pub horizon_time: f64,
    /// Interval blocks, near term first
    pub segments: Vec<HorizonSegment>,
}

impl Default for HorizonConfig {
    fn default() -> Self {
        Self {
            horizon_time: 10.0,
            // 5 × 0.2 s with one substep, then 15 × 0.6 s with three
            segments: vec![
                HorizonSegment {
                    intervals: 5,
                    relative_duration: 1.0,
                    substeps: 1,
                },
                HorizonSegment {
                    intervals: 15,
                    relative_duration: 3.0,
                    substeps: 3,
                },
            ],
        }
    }
}

impl HorizonConfig {
    /// Total number of shooting intervals (N)
    pub fn num_intervals(&self) -> usize {
        self.segments.iter().map(|s| s.intervals).sum()
    }

    /// Compute time intervals for each segment
    ///
    /// Durations are derived from the total horizon time and the relative
    /// lengths, never from the substep counts:
    /// `dt = horizon_time · rel / Σ(intervals · rel)`.
    pub fn compute_intervals(&self) -> Vec<f64> {
        let weight: f64 = self
            .segments
            .iter()
            .map(|s| s.intervals as f64 * s.relative_duration)
            .sum();

        self.segments
            .iter()
            .flat_map(|s| {
                let dt = self.horizon_time * s.relative_duration / weight;
                std::iter::repeat(dt).take(s.intervals)
            })
            .collect()
    }

    /// Substep count for each interval
    pub fn compute_substeps(&self) -> Vec<usize> {
        self.segments
            .iter()
            .flat_map(|s| std::iter::repeat(s.substeps).take(s.intervals))
            .collect()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.horizon_time.is_finite() || self.horizon_time <= 0.0 {
            return Err(ConfigError::invalid(
                "horizon.horizon_time",
                format!("{} (must be > 0)", self.horizon_time),
            ));
        }
        if self.num_intervals() == 0 {
            return Err(ConfigError::invalid(
                "horizon.segments",
                "at least one shooting interval is required",
            ));
        }
        for segment in &self.segments {
            if segment.substeps == 0 {
                return Err(ConfigError::invalid("horizon.segments.substeps", "must be >= 1"));
            }
            if !segment.relative_duration.is_finite() || segment.relative_duration <= 0.0 {
                return Err(ConfigError::invalid(
                    "horizon.segments.relative_duration",
                    format!("{} (must be > 0)", segment.relative_duration),
                ));
            }
        }
        Ok(())
    }
}

/// Sigmoid shaping of the standstill-to-cruise minimum gap
///
/// `min_gap(v) = amplitude / (1 + exp(offset − slope·v)) + base`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MinGapSigmoid {
    pub amplitude: f64,
    pub offset: f64,
    pub slope: f64,
    pub base: f64,
}

impl Default for MinGapSigmoid {
    fn default() -> Self {
        Self {
            amplitude: 2.75,
            offset: 2.2,
            slope: 0.9,
            base: 1.25,
        }
    }
}

/// Shape constants of the follow-distance cost
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostParams {
    /// Braking reference deceleration [m/s²]
    pub gravity: f64,
    /// Margin added to the reaction buffer in the range-rate error [m]
    pub safety_margin: f64,
    /// Gain inside the exponential range-rate penalty
    pub ttc_gain: f64,
    /// Minimum gap sigmoid
    pub min_gap: MinGapSigmoid,
}

impl Default for CostParams {
    fn default() -> Self {
        Self {
            gravity: lmpc_core::GRAVITY,
            safety_margin: 4.0,
            ttc_gain: 0.3,
            min_gap: MinGapSigmoid::default(),
        }
    }
}

impl CostParams {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.gravity.is_finite() || self.gravity <= 0.0 {
            return Err(ConfigError::invalid("cost.gravity", format!("{} (must be > 0)", self.gravity)));
        }
        let values = [
            ("cost.safety_margin", self.safety_margin),
            ("cost.ttc_gain", self.ttc_gain),
            ("cost.min_gap.amplitude", self.min_gap.amplitude),
            ("cost.min_gap.offset", self.min_gap.offset),
            ("cost.min_gap.slope", self.min_gap.slope),
            ("cost.min_gap.base", self.min_gap.base),
        ];
        for (field, value) in values {
            if !value.is_finite() {
                return Err(ConfigError::invalid(field, format!("{value} (must be finite)")));
            }
        }
        Ok(())
    }
}

/// Cost function weights (diagonal of the least-squares weighting matrices)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostWeights {
    /// Exponential range-rate (time-to-collision) penalty
    pub ttc: f64,
    /// Follow-distance tracking
    pub distance: f64,
    /// Acceleration comfort
    pub acceleration: f64,
    /// Jerk comfort
    pub jerk: f64,

    /// Terminal range-rate penalty
    pub terminal_ttc: f64,
    /// Terminal follow-distance tracking
    pub terminal_distance: f64,
    /// Terminal acceleration
    pub terminal_acceleration: f64,

    /// Scale each interval's weights by its duration relative to the first
    /// interval (variable weighting matrix along the grid)
    pub scale_by_interval: bool,
}

impl Default for CostWeights {
    fn default() -> Self {
        Self {
            ttc: 5.0,
            distance: 0.1,
            acceleration: 10.0,
            jerk: 20.0,
            terminal_ttc: 5.0,
            terminal_distance: 0.1,
            terminal_acceleration: 10.0,
            scale_by_interval: true,
        }
    }
}

impl CostWeights {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let values = [
            ("weights.ttc", self.ttc),
            ("weights.distance", self.distance),
            ("weights.acceleration", self.acceleration),
            ("weights.jerk", self.jerk),
            ("weights.terminal_ttc", self.terminal_ttc),
            ("weights.terminal_distance", self.terminal_distance),
            ("weights.terminal_acceleration", self.terminal_acceleration),
        ];
        for (field, value) in values {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::invalid(field, format!("{value} (must be >= 0)")));
            }
        }
        // The condensed Hessian is only positive definite with a jerk penalty
        if self.jerk <= 0.0 {
            return Err(ConfigError::invalid("weights.jerk", "must be > 0"));
        }
        Ok(())
    }
}

/// How the lead vehicle is propagated over the horizon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadPrediction {
    /// `x_l(t) = x_l0 + v_l·t`
    ConstantVelocity,
    /// `x_l(t) = x_l0 + v_l·t + ½a_l·t²` until the lead comes to rest
    #[default]
    ConstantAcceleration,
    /// Lead position held at its observed value
    Static,
}

/// Following preferences
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FollowConfig {
    /// Default following time gap [s]
    pub time_gap: f64,
    /// Lead motion model over the horizon
    pub lead_prediction: LeadPrediction,
}

impl Default for FollowConfig {
    fn default() -> Self {
        Self {
            time_gap: 1.8,
            lead_prediction: LeadPrediction::ConstantAcceleration,
        }
    }
}

impl FollowConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.time_gap.is_finite() || self.time_gap < 0.0 {
            return Err(ConfigError::invalid(
                "follow.time_gap",
                format!("{} (must be >= 0)", self.time_gap),
            ));
        }
        Ok(())
    }
}

/// Initial guess used when no warm start is available
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColdStart {
    /// Forward rollout of the current state with zero jerk
    #[default]
    ZeroJerk,
    /// Straight-line extrapolation at the current velocity
    ConstantVelocity,
}

/// Solver configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    /// Maximum SQP iterations per tick
    pub max_iterations: usize,
    /// Maximum active-set iterations per QP
    pub max_qp_iterations: usize,
    /// Convergence tolerance on the largest shooting defect
    pub defect_tolerance: f64,
    /// Convergence tolerance on the relative objective change
    pub cost_tolerance: f64,
    /// Wall-clock budget per solve [ms]
    pub max_solve_time_ms: f64,
    /// Objective growth (relative to the initial guess) treated as divergence
    pub divergence_ratio: f64,
    /// Tikhonov term added to the condensed Hessian
    pub hessian_regularization: f64,
    /// Use warm-starting from previous solution
    pub warm_start: bool,
    /// Initial guess without warm start
    pub cold_start: ColdStart,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_iterations: 15,
            max_qp_iterations: 500,
            defect_tolerance: 1e-6,
            cost_tolerance: 1e-6,
            max_solve_time_ms: 50.0,
            divergence_ratio: 1e6,
            hessian_regularization: 1e-8,
            warm_start: true,
            cold_start: ColdStart::ZeroJerk,
        }
    }
}

impl SolverConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_iterations == 0 {
            return Err(ConfigError::invalid("solver.max_iterations", "must be >= 1"));
        }
        if self.max_qp_iterations == 0 {
            return Err(ConfigError::invalid("solver.max_qp_iterations", "must be >= 1"));
        }
        let positive = [
            ("solver.defect_tolerance", self.defect_tolerance),
            ("solver.cost_tolerance", self.cost_tolerance),
            ("solver.max_solve_time_ms", self.max_solve_time_ms),
        ];
        for (field, value) in positive {
            if !value.is_finite() || value <= 0.0 {
                return Err(ConfigError::invalid(field, format!("{value} (must be > 0)")));
            }
        }
        if !self.divergence_ratio.is_finite() || self.divergence_ratio <= 1.0 {
            return Err(ConfigError::invalid(
                "solver.divergence_ratio",
                format!("{} (must be > 1)", self.divergence_ratio),
            ));
        }
        if !self.hessian_regularization.is_finite() || self.hessian_regularization < 0.0 {
            return Err(ConfigError::invalid(
                "solver.hessian_regularization",
                format!("{} (must be >= 0)", self.hessian_regularization),
            ));
        }
        Ok(())
    }
}

/// Degraded-mode behaviour when a tick does not converge
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackConfig {
    /// Fixed deceleration target [m/s²]
    pub deceleration: f64,
    /// Jerk limit used to reach the deceleration target [m/s³]
    pub max_jerk: f64,
    /// Consecutive fallback ticks during which the last good jerk is held
    pub max_hold_ticks: usize,
    /// Largest defect for which a non-converged iterate may still be used
    pub max_defect_for_best_effort: f64,
    /// Below this speed the fixed fallback targets zero acceleration [m/s]
    pub standstill_speed: f64,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            deceleration: -1.0,
            max_jerk: 5.0,
            max_hold_ticks: 3,
            max_defect_for_best_effort: 1e-3,
            standstill_speed: 0.1,
        }
    }
}

impl FallbackConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.deceleration.is_finite() || self.deceleration > 0.0 {
            return Err(ConfigError::invalid(
                "fallback.deceleration",
                format!("{} (must be <= 0)", self.deceleration),
            ));
        }
        if !self.max_jerk.is_finite() || self.max_jerk <= 0.0 {
            return Err(ConfigError::invalid(
                "fallback.max_jerk",
                format!("{} (must be > 0)", self.max_jerk),
            ));
        }
        if !self.max_defect_for_best_effort.is_finite() || self.max_defect_for_best_effort < 0.0 {
            return Err(ConfigError::invalid(
                "fallback.max_defect_for_best_effort",
                format!("{} (must be >= 0)", self.max_defect_for_best_effort),
            ));
        }
        if !self.standstill_speed.is_finite() || self.standstill_speed < 0.0 {
            return Err(ConfigError::invalid(
                "fallback.standstill_speed",
                format!("{} (must be >= 0)", self.standstill_speed),
            ));
        }
        Ok(())
    }
}

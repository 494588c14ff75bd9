//! Receding-horizon follow controller
//!
//! Main interface of the planner. Each tick validates the inputs, solves
//! the OCP warm-started from the previous solution and returns the first
//! jerk of the plan. When a solve fails the controller degrades in a
//! defined way instead of emitting an unchecked command:
//!
//! | failure            | command                       | warm start |
//! |--------------------|-------------------------------|------------|
//! | invalid input      | hold last good command        | kept       |
//! | numerical overflow | hold, then fixed deceleration | cleared    |
//! | infeasible QP      | hold, then fixed deceleration | kept       |
//! | diverged           | hold, then fixed deceleration | kept       |
//! | budget exceeded    | best iterate if it checks out | kept       |
//!
//! The last good command is held for at most `max_hold_ticks` consecutive
//! fallback ticks.

use log::{debug, info, warn};

use lmpc_core::dynamics::EgoState;

use crate::config::{ConfigError, PlannerConfig};
use crate::constraints::ConstraintEvaluator;
use crate::ocp::{InputError, OcpDefinition, OcpError, OnlineParameters};
use crate::qp::QpError;
use crate::solver::{SolveOptions, SolveStatistics, SolverError, SqpSolver};
use crate::trajectory::Trajectory;
use crate::warm_start::WarmStartCache;

/// Tolerance on `v ≥ 0` when vetting a non-converged trajectory
const BEST_EFFORT_VELOCITY_TOLERANCE: f64 = 1e-6;

/// Controller state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    /// No tick processed yet
    Idle,
    /// Solve in progress
    Solving,
    /// Last tick produced a converged solution
    Converged,
    /// Last tick used a fallback command
    Fallback,
}

/// Outcome of a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SolveStatus {
    Converged,
    Fallback,
}

/// Why a tick fell back
#[derive(Debug, Clone, PartialEq)]
pub enum FallbackReason {
    InputInvalid(InputError),
    NumericalOverflow { node: usize },
    Infeasible { node: usize },
    BudgetExceeded,
    Diverged,
    QpFailure(QpError),
    InvalidIterate(OcpError),
}

impl From<&SolverError> for FallbackReason {
    fn from(err: &SolverError) -> Self {
        match err {
            SolverError::NumericalOverflow { node } => Self::NumericalOverflow { node: *node },
            SolverError::Infeasible { node } => Self::Infeasible { node: *node },
            SolverError::BudgetExceeded { .. } => Self::BudgetExceeded,
            SolverError::Diverged { .. } => Self::Diverged,
            SolverError::QpFailed(e) => Self::QpFailure(e.clone()),
            SolverError::InvalidIterate(e) => Self::InvalidIterate(e.clone()),
        }
    }
}

/// Jerk command and the acceleration it reaches after the first interval
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Command {
    pub jerk: f64,
    pub acceleration: f64,
}

/// Result of one controller tick
#[derive(Debug, Clone)]
pub struct TickOutput {
    pub status: SolveStatus,
    /// Jerk to apply [m/s³]
    pub jerk: f64,
    /// Commanded acceleration [m/s²]
    pub acceleration: f64,
    /// Planned trajectory, when one was accepted
    pub trajectory: Option<Trajectory>,
    pub statistics: SolveStatistics,
    pub fallback_reason: Option<FallbackReason>,
    /// The trajectory comes from a non-converged but vetted iterate
    pub best_effort: bool,
}

impl TickOutput {
    pub fn command(&self) -> Command {
        Command {
            jerk: self.jerk,
            acceleration: self.acceleration,
        }
    }
}

/// Longitudinal follow controller
pub struct Controller {
    config: PlannerConfig,
    ocp: OcpDefinition,
    solver: SqpSolver,
    cache: WarmStartCache,
    checker: ConstraintEvaluator,
    state: ControllerState,
    last_command: Option<Command>,
    consecutive_fallbacks: usize,
    ticks: u64,
}

impl Controller {
    pub fn new(config: PlannerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let ocp = OcpDefinition::new(&config)?;
        let solver = SqpSolver::new(SolveOptions::from(&config.solver));

        info!(
            "Follow controller ready: {} intervals over {:.1} s",
            ocp.horizon().num_intervals(),
            ocp.horizon().total_duration()
        );

        Ok(Self {
            config,
            ocp,
            solver,
            cache: WarmStartCache::new(),
            checker: ConstraintEvaluator::new(BEST_EFFORT_VELOCITY_TOLERANCE),
            state: ControllerState::Idle,
            last_command: None,
            consecutive_fallbacks: 0,
            ticks: 0,
        })
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    pub fn ocp(&self) -> &OcpDefinition {
        &self.ocp
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn warm_start(&self) -> &WarmStartCache {
        &self.cache
    }

    /// Ticks processed since construction or the last reset
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Online parameters using the configured time gap
    pub fn parameters(&self, lead_position: f64, lead_velocity: f64) -> OnlineParameters {
        OnlineParameters::new(lead_position, lead_velocity, self.config.follow.time_gap)
    }

    /// Forget the warm start and the held command
    pub fn reset(&mut self) {
        self.cache.reset();
        self.state = ControllerState::Idle;
        self.last_command = None;
        self.consecutive_fallbacks = 0;
        self.ticks = 0;
    }

    /// Run one control tick
    ///
    /// `dt` is the time since the previous tick [s], used to shift the warm
    /// start; pass 0 to re-solve at the same instant.
    pub fn tick(&mut self, state: &EgoState, params: &OnlineParameters, dt: f64) -> TickOutput {
        self.ticks += 1;

        if !dt.is_finite() || dt < 0.0 {
            return self.reject(InputError::InvalidPeriod(dt));
        }
        self.cache.advance(dt);

        let problem = match self.ocp.problem(state, params) {
            Ok(problem) => problem,
            Err(err) => return self.reject(err),
        };

        self.state = ControllerState::Solving;
        let seed = if self.config.solver.warm_start {
            self.cache.seed(self.ocp.horizon())
        } else {
            None
        };

        match self.solver.solve(&problem, seed) {
            Ok(solution) => {
                let trajectory = solution.trajectory;
                let command = Command {
                    jerk: trajectory.first_control().unwrap_or(0.0),
                    acceleration: trajectory
                        .first_step_acceleration()
                        .unwrap_or(state.acceleration),
                };
                debug!(
                    "Tick {}: converged, jerk {:.4}, {} SQP iterations",
                    self.ticks, command.jerk, solution.statistics.sqp_iterations
                );

                self.cache.store(trajectory.clone(), solution.multipliers);
                self.last_command = Some(command);
                self.consecutive_fallbacks = 0;
                self.state = ControllerState::Converged;

                TickOutput {
                    status: SolveStatus::Converged,
                    jerk: command.jerk,
                    acceleration: command.acceleration,
                    trajectory: Some(trajectory),
                    statistics: solution.statistics,
                    fallback_reason: None,
                    best_effort: false,
                }
            }
            Err(err) => self.recover(err, state),
        }
    }

    /// Run one tick from flat slices `[p, v, a]` and
    /// `[x_lead, v_lead, time_gap]` or `[x_lead, v_lead, time_gap, a_lead]`
    pub fn tick_raw(&mut self, state: &[f64], params: &[f64], dt: f64) -> TickOutput {
        let Some(ego) = EgoState::from_slice(state) else {
            self.ticks += 1;
            return self.reject(InputError::Dimension {
                what: "state",
                expected: EgoState::DIM,
                got: state.len(),
            });
        };
        match OnlineParameters::from_slice(params) {
            Ok(params) => self.tick(&ego, &params, dt),
            Err(err) => {
                self.ticks += 1;
                self.reject(err)
            }
        }
    }

    /// Inputs rejected before any solve attempt
    fn reject(&mut self, err: InputError) -> TickOutput {
        warn!("Tick {}: rejected input: {}", self.ticks, err);
        self.fallback(FallbackReason::InputInvalid(err), None, SolveStatistics::default())
    }

    /// Map a solver failure to a degraded command
    fn recover(&mut self, err: SolverError, state: &EgoState) -> TickOutput {
        warn!("Tick {}: solve failed: {}", self.ticks, err);
        let reason = FallbackReason::from(&err);
        let statistics = self.solver.statistics().clone();

        match err {
            SolverError::NumericalOverflow { .. } | SolverError::InvalidIterate(_) => {
                self.cache.reset();
                self.fallback(reason, Some(state), statistics)
            }
            SolverError::BudgetExceeded { best, .. } => {
                let usable = best.statistics.defect_violation
                    <= self.config.fallback.max_defect_for_best_effort
                    && self.checker.evaluate(&best.trajectory).all_satisfied;
                if !usable {
                    return self.fallback(reason, Some(state), statistics);
                }

                let command = Command {
                    jerk: best.trajectory.first_control().unwrap_or(0.0),
                    acceleration: best
                        .trajectory
                        .first_step_acceleration()
                        .unwrap_or(state.acceleration),
                };
                debug!("Tick {}: using best-effort iterate", self.ticks);

                self.last_command = Some(command);
                self.consecutive_fallbacks += 1;
                self.state = ControllerState::Fallback;

                TickOutput {
                    status: SolveStatus::Fallback,
                    jerk: command.jerk,
                    acceleration: command.acceleration,
                    trajectory: Some(best.trajectory),
                    statistics: best.statistics,
                    fallback_reason: Some(reason),
                    best_effort: true,
                }
            }
            _ => self.fallback(reason, Some(state), statistics),
        }
    }

    fn fallback(
        &mut self,
        reason: FallbackReason,
        state: Option<&EgoState>,
        statistics: SolveStatistics,
    ) -> TickOutput {
        self.state = ControllerState::Fallback;
        self.consecutive_fallbacks += 1;

        let command = match self.last_command {
            Some(command) if self.consecutive_fallbacks <= self.config.fallback.max_hold_ticks => command,
            _ => self.fixed_deceleration(state),
        };

        TickOutput {
            status: SolveStatus::Fallback,
            jerk: command.jerk,
            acceleration: command.acceleration,
            trajectory: None,
            statistics,
            fallback_reason: Some(reason),
            best_effort: false,
        }
    }

    /// Jerk-limited approach to the fixed deceleration (zero at standstill)
    fn fixed_deceleration(&self, state: Option<&EgoState>) -> Command {
        let fallback = &self.config.fallback;
        let dt = self.ocp.horizon().duration(0);

        match state {
            Some(state) => {
                let target = if state.velocity <= fallback.standstill_speed {
                    0.0
                } else {
                    fallback.deceleration
                };
                let jerk = ((target - state.acceleration) / dt).clamp(-fallback.max_jerk, fallback.max_jerk);
                Command {
                    jerk,
                    acceleration: state.acceleration + jerk * dt,
                }
            }
            None => Command {
                jerk: 0.0,
                acceleration: fallback.deceleration,
            },
        }
    }
}

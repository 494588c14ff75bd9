//! SQP solver
//!
//! Gauss-Newton sequential quadratic programming on the multiple-shooting
//! OCP. Every iteration linearizes at the current iterate, condenses the
//! QP onto the jerk increments, solves it with the dual active-set method
//! (hot-started from the previous active set) and takes the full step.

use std::time::Instant;

use log::{debug, trace};
use nalgebra::DVector;
use thiserror::Error;

use crate::config::{ColdStart, SolverConfig};
use crate::ocp::{Linearization, OcpError, OcpIterate, OcpProblem};
use crate::qp::{ActiveSetSolver, CondensedQp, QpError};
use crate::trajectory::Trajectory;

/// Solver errors
#[derive(Debug, Clone, Error)]
pub enum SolverError {
    #[error("Numerical overflow at node {node}")]
    NumericalOverflow { node: usize },
    #[error("QP infeasible: velocity constraint at node {node}")]
    Infeasible { node: usize },
    #[error("Iteration or time budget exceeded after {iterations} iterations")]
    BudgetExceeded {
        iterations: usize,
        best: Box<BestEffort>,
    },
    #[error("Objective diverged: {objective} from initial {initial}")]
    Diverged { objective: f64, initial: f64 },
    #[error("QP solver failed: {0}")]
    QpFailed(QpError),
    #[error("Invalid iterate: {0}")]
    InvalidIterate(OcpError),
}

impl From<OcpError> for SolverError {
    fn from(err: OcpError) -> Self {
        match err {
            OcpError::NumericalOverflow { node } => SolverError::NumericalOverflow { node },
            other => SolverError::InvalidIterate(other),
        }
    }
}

impl From<QpError> for SolverError {
    fn from(err: QpError) -> Self {
        match err {
            QpError::Infeasible { constraint } => SolverError::Infeasible { node: constraint },
            other => SolverError::QpFailed(other),
        }
    }
}

/// Solution statistics from solver
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SolveStatistics {
    /// Number of SQP iterations
    pub sqp_iterations: usize,
    /// Total active-set iterations over all QPs
    pub qp_iterations: usize,
    /// Total solve time [ms]
    pub solve_time_ms: f64,
    /// Largest shooting defect at the returned iterate
    pub defect_violation: f64,
    /// Objective value at the returned iterate
    pub objective: f64,
    /// Objective change of the last iteration
    pub cost_change: f64,
    /// Euclidean norm of the last jerk step
    pub step_norm: f64,
    /// Whether the solve started from a warm start
    pub warm_started: bool,
}

/// Configuration for a single solve call
#[derive(Debug, Clone)]
pub struct SolveOptions {
    /// Maximum SQP iterations
    pub max_sqp_iter: usize,
    /// Maximum active-set iterations per QP
    pub max_qp_iter: usize,
    /// Timeout in milliseconds
    pub timeout_ms: Option<f64>,
    pub defect_tolerance: f64,
    pub cost_tolerance: f64,
    pub divergence_ratio: f64,
    pub regularization: f64,
    /// Initial guess without a warm start
    pub cold_start: ColdStart,
}

impl Default for SolveOptions {
    fn default() -> Self {
        Self::from(&SolverConfig::default())
    }
}

impl From<&SolverConfig> for SolveOptions {
    fn from(config: &SolverConfig) -> Self {
        Self {
            max_sqp_iter: config.max_iterations,
            max_qp_iter: config.max_qp_iterations,
            timeout_ms: Some(config.max_solve_time_ms),
            defect_tolerance: config.defect_tolerance,
            cost_tolerance: config.cost_tolerance,
            divergence_ratio: config.divergence_ratio,
            regularization: config.hessian_regularization,
            cold_start: config.cold_start,
        }
    }
}

/// Initial iterate and active set carried over from a previous solve
#[derive(Debug, Clone, PartialEq)]
pub struct Seed {
    pub iterate: OcpIterate,
    /// Velocity constraints (node indices) expected to be active
    pub active_set: Vec<usize>,
}

/// Converged solution
#[derive(Debug, Clone)]
pub struct SqpSolution {
    pub trajectory: Trajectory,
    /// Velocity-constraint multipliers, one per node (N+1)
    pub multipliers: Vec<f64>,
    pub statistics: SolveStatistics,
}

/// Last iterate of a solve that ran out of budget
#[derive(Debug, Clone)]
pub struct BestEffort {
    pub trajectory: Trajectory,
    pub multipliers: Vec<f64>,
    pub statistics: SolveStatistics,
}

/// Gauss-Newton SQP solver
#[derive(Debug, Clone)]
pub struct SqpSolver {
    options: SolveOptions,
    qp: ActiveSetSolver,
    stats: SolveStatistics,
}

impl SqpSolver {
    pub fn new(options: SolveOptions) -> Self {
        let qp = ActiveSetSolver::new(options.max_qp_iter);
        Self {
            options,
            qp,
            stats: SolveStatistics::default(),
        }
    }

    pub fn options(&self) -> &SolveOptions {
        &self.options
    }

    /// Statistics of the most recent solve
    pub fn statistics(&self) -> &SolveStatistics {
        &self.stats
    }

    /// Solve one OCP instance
    ///
    /// Converged when the largest defect is within `defect_tolerance` and
    /// the objective changed by at most `cost_tolerance · max(1, |J|)`.
    pub fn solve(&mut self, problem: &OcpProblem<'_>, seed: Option<Seed>) -> Result<SqpSolution, SolverError> {
        let start = Instant::now();
        let horizon = problem.horizon();
        let warm_started = seed.is_some();

        self.stats = SolveStatistics {
            warm_started,
            ..SolveStatistics::default()
        };

        let (mut iterate, mut active_set) = match seed {
            Some(seed) => (seed.iterate, seed.active_set),
            None => (problem.cold_start(self.options.cold_start)?, Vec::new()),
        };

        let mut lin = problem.linearize(&iterate)?;
        let initial_objective = lin.objective;
        let mut multipliers = vec![0.0; horizon.num_nodes()];

        for iteration in 1..=self.options.max_sqp_iter {
            let condensed = CondensedQp::condense(&lin, self.options.regularization);
            let qp_solution = self.qp.solve(&condensed.qp, &active_set)?;
            self.stats.qp_iterations += qp_solution.iterations;

            iterate = apply_step(&iterate, &condensed, &qp_solution.step);
            active_set = qp_solution.active_set;
            multipliers = qp_solution.multipliers.iter().copied().collect();

            let next = problem.linearize(&iterate)?;
            let cost_change = next.objective - lin.objective;
            lin = next;

            self.stats.sqp_iterations = iteration;
            self.stats.objective = lin.objective;
            self.stats.defect_violation = lin.defect_violation;
            self.stats.cost_change = cost_change;
            self.stats.step_norm = qp_solution.step.norm();
            self.stats.solve_time_ms = elapsed_ms(start);

            trace!(
                "SQP iter {}: objective {:.6e}, defect {:.3e}, active {}",
                iteration,
                lin.objective,
                lin.defect_violation,
                active_set.len()
            );

            if lin.objective > self.options.divergence_ratio * initial_objective.max(1.0) {
                return Err(SolverError::Diverged {
                    objective: lin.objective,
                    initial: initial_objective,
                });
            }

            if self.converged(&lin, cost_change) {
                debug!(
                    "SQP converged in {} iterations ({:.3} ms)",
                    iteration, self.stats.solve_time_ms
                );
                return Ok(SqpSolution {
                    trajectory: Trajectory::from_iterate(horizon, &iterate),
                    multipliers,
                    statistics: self.stats.clone(),
                });
            }

            if let Some(timeout) = self.options.timeout_ms {
                if self.stats.solve_time_ms > timeout {
                    break;
                }
            }
        }

        Err(SolverError::BudgetExceeded {
            iterations: self.stats.sqp_iterations,
            best: Box::new(BestEffort {
                trajectory: Trajectory::from_iterate(horizon, &iterate),
                multipliers,
                statistics: self.stats.clone(),
            }),
        })
    }

    fn converged(&self, lin: &Linearization, cost_change: f64) -> bool {
        lin.defect_violation <= self.options.defect_tolerance
            && cost_change.abs() <= self.options.cost_tolerance * lin.objective.abs().max(1.0)
    }
}

/// Full Newton step on every node and interval
fn apply_step(iterate: &OcpIterate, condensed: &CondensedQp, step: &DVector<f64>) -> OcpIterate {
    let state_steps = condensed.expand(step);
    OcpIterate {
        states: iterate
            .states
            .iter()
            .zip(&state_steps)
            .map(|(x, dx)| x + dx)
            .collect(),
        controls: iterate
            .controls
            .iter()
            .zip(step.iter())
            .map(|(u, du)| u + du)
            .collect(),
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

//! Path constraints for the OCP
//!
//! The follow problem has a single path constraint, forward motion only:
//! `v_k ≥ 0` at every node. The QP enforces it in linearized form; this
//! module checks it on a finished trajectory, which is how a non-converged
//! iterate is vetted before it is allowed to drive the vehicle.

use crate::trajectory::Trajectory;

/// Result of constraint evaluation
#[derive(Debug, Clone, PartialEq)]
pub struct ConstraintEvaluation {
    /// Constraint values (negative = satisfied, positive = violated)
    pub values: Vec<f64>,
    /// Names for debugging
    pub names: Vec<String>,
    /// Whether all constraints are satisfied
    pub all_satisfied: bool,
    /// Maximum violation (0 if all satisfied)
    pub max_violation: f64,
    tolerance: f64,
}

impl ConstraintEvaluation {
    pub fn new(tolerance: f64) -> Self {
        Self {
            values: Vec::new(),
            names: Vec::new(),
            all_satisfied: true,
            max_violation: 0.0,
            tolerance,
        }
    }

    pub fn add(&mut self, name: String, value: f64) {
        if value > self.tolerance || value.is_nan() {
            self.all_satisfied = false;
        }
        if value > 0.0 {
            self.max_violation = self.max_violation.max(value);
        }
        self.names.push(name);
        self.values.push(value);
    }
}

/// Constraint evaluator for planned trajectories
#[derive(Debug, Clone)]
pub struct ConstraintEvaluator {
    tolerance: f64,
}

impl ConstraintEvaluator {
    /// `tolerance`: violation accepted as satisfied
    pub fn new(tolerance: f64) -> Self {
        Self { tolerance }
    }

    /// Evaluate `−v_k ≤ 0` at every node
    pub fn evaluate(&self, trajectory: &Trajectory) -> ConstraintEvaluation {
        let mut eval = ConstraintEvaluation::new(self.tolerance);
        for (k, state) in trajectory.states.iter().enumerate() {
            eval.add(format!("velocity[{k}]"), -state.velocity);
        }
        eval
    }
}

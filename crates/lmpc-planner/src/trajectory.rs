//! Planned trajectory representation and interpolation
//!
//! Holds the node states and interval jerks of a solved OCP on its time
//! grid. Between nodes the state is reconstructed exactly by integrating
//! the constant-jerk dynamics from the preceding node, which is what the
//! warm start uses to shift a previous solution forward in time.

use lmpc_core::dynamics::{EgoState, LongitudinalDynamics};
use lmpc_core::math::integrate_interval;
use lmpc_core::ControlVector;

use crate::cost::LeadState;
use crate::horizon::Horizon;
use crate::ocp::OcpIterate;

/// A complete planned trajectory from the OCP solver
#[derive(Debug, Clone, PartialEq)]
pub struct Trajectory {
    /// Time stamps for each node, relative to the solve [s]
    pub times: Vec<f64>,
    /// State sequence (N+1)
    pub states: Vec<EgoState>,
    /// Jerk sequence (N), constant over each interval
    pub controls: Vec<f64>,
}

impl Trajectory {
    pub fn from_iterate(horizon: &Horizon, iterate: &OcpIterate) -> Self {
        Self {
            times: horizon.node_times().to_vec(),
            states: iterate.states.iter().map(EgoState::from_vector).collect(),
            controls: iterate.controls.clone(),
        }
    }

    pub fn to_iterate(&self) -> OcpIterate {
        OcpIterate {
            states: self.states.iter().map(EgoState::to_vector).collect(),
            controls: self.controls.clone(),
        }
    }

    pub fn num_intervals(&self) -> usize {
        self.controls.len()
    }

    /// Time span covered by the trajectory [s]
    pub fn duration(&self) -> f64 {
        match (self.times.first(), self.times.last()) {
            (Some(first), Some(last)) => last - first,
            _ => 0.0,
        }
    }

    /// Jerk to apply now
    pub fn first_control(&self) -> Option<f64> {
        self.controls.first().copied()
    }

    /// Planned acceleration at the end of the first interval
    pub fn first_step_acceleration(&self) -> Option<f64> {
        self.states.get(1).map(|s| s.acceleration)
    }

    /// Index of the interval containing `t`
    fn interval_at(&self, t: f64) -> usize {
        let last = self.controls.len().saturating_sub(1);
        self.times
            .iter()
            .position(|&time| time > t)
            .unwrap_or(self.times.len())
            .saturating_sub(1)
            .min(last)
    }

    /// State at time `t`
    ///
    /// Exact inside the horizon. Before the first node the first state is
    /// returned; past the last node the terminal state is extrapolated with
    /// zero jerk.
    pub fn state_at(&self, t: f64) -> Option<EgoState> {
        let first = *self.states.first()?;
        let last = *self.states.last()?;
        let t_start = *self.times.first()?;
        let t_end = *self.times.last()?;
        let model = LongitudinalDynamics::new();

        if t <= t_start || self.controls.is_empty() {
            return Some(first);
        }
        if t >= t_end {
            let x = integrate_interval(&model, &last.to_vector(), &ControlVector::zeros(), t - t_end, 1)
                .ok()?;
            return Some(EgoState::from_vector(&x));
        }

        let k = self.interval_at(t);
        let x = integrate_interval(
            &model,
            &self.states[k].to_vector(),
            &ControlVector::new(self.controls[k]),
            t - self.times[k],
            1,
        )
        .ok()?;
        Some(EgoState::from_vector(&x))
    }

    /// Jerk at time `t` (zero-order hold, zero past the horizon)
    pub fn control_at(&self, t: f64) -> Option<f64> {
        let first = *self.controls.first()?;
        let t_end = self.times.get(self.controls.len()).copied()?;

        if t <= self.times[0] {
            return Some(first);
        }
        if t >= t_end {
            return Some(0.0);
        }
        Some(self.controls[self.interval_at(t)])
    }

    /// Gap to the lead at each node
    pub fn gaps(&self, leads: &[LeadState]) -> Vec<f64> {
        self.states
            .iter()
            .zip(leads)
            .map(|(state, lead)| lead.position - state.position)
            .collect()
    }

    /// Lowest planned velocity
    pub fn min_velocity(&self) -> f64 {
        self.states
            .iter()
            .map(|s| s.velocity)
            .fold(f64::INFINITY, f64::min)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HorizonConfig;
    use approx::assert_relative_eq;
    use lmpc_core::StateVector;

    fn ramp() -> Trajectory {
        // Two 1 s intervals: jerk 1 then jerk −1 from rest
        let model = LongitudinalDynamics::new();
        let x0 = StateVector::zeros();
        let x1 = integrate_interval(&model, &x0, &ControlVector::new(1.0), 1.0, 1).unwrap();
        let x2 = integrate_interval(&model, &x1, &ControlVector::new(-1.0), 1.0, 1).unwrap();

        Trajectory {
            times: vec![0.0, 1.0, 2.0],
            states: vec![x0, x1, x2].iter().map(EgoState::from_vector).collect(),
            controls: vec![1.0, -1.0],
        }
    }

    #[test]
    fn test_state_at_nodes_and_between() {
        let traj = ramp();

        assert_eq!(traj.state_at(0.0).unwrap(), traj.states[0]);
        let at_one = traj.state_at(1.0).unwrap();
        assert_relative_eq!(at_one.velocity, traj.states[1].velocity, epsilon = 1e-12);

        // Inside the first interval: p = t³/6, v = t²/2, a = t
        let mid = traj.state_at(0.5).unwrap();
        assert_relative_eq!(mid.position, 0.125 / 6.0, epsilon = 1e-12);
        assert_relative_eq!(mid.velocity, 0.125, epsilon = 1e-12);
        assert_relative_eq!(mid.acceleration, 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_state_extrapolated_past_end() {
        let traj = ramp();
        let end = traj.states[2];
        let later = traj.state_at(3.0).unwrap();

        // Terminal acceleration is zero, so velocity is held
        assert_relative_eq!(end.acceleration, 0.0, epsilon = 1e-12);
        assert_relative_eq!(later.velocity, end.velocity, epsilon = 1e-12);
        assert_relative_eq!(later.position, end.position + end.velocity, epsilon = 1e-12);
    }

    #[test]
    fn test_control_zero_order_hold() {
        let traj = ramp();

        assert_eq!(traj.control_at(-1.0), Some(1.0));
        assert_eq!(traj.control_at(0.3), Some(1.0));
        assert_eq!(traj.control_at(1.0), Some(-1.0));
        assert_eq!(traj.control_at(1.7), Some(-1.0));
        assert_eq!(traj.control_at(2.5), Some(0.0));
        assert_eq!(traj.first_control(), Some(1.0));
    }

    #[test]
    fn test_iterate_roundtrip() {
        let horizon = Horizon::new(&HorizonConfig::default()).unwrap();
        let iterate = OcpIterate {
            states: (0..21).map(|k| StateVector::new(k as f64, 10.0, 0.0)).collect(),
            controls: vec![0.1; 20],
        };

        let traj = Trajectory::from_iterate(&horizon, &iterate);
        assert_eq!(traj.times.len(), 21);
        assert_eq!(traj.duration(), 10.0);
        assert_eq!(traj.to_iterate(), iterate);
    }

    #[test]
    fn test_gaps_and_min_velocity() {
        let traj = ramp();
        let leads = vec![LeadState::new(10.0, 0.0); 3];

        let gaps = traj.gaps(&leads);
        assert_eq!(gaps.len(), 3);
        assert_relative_eq!(gaps[0], 10.0);
        assert!(gaps[2] < gaps[1]);
        assert_relative_eq!(traj.min_velocity(), 0.0);
    }

    #[test]
    fn test_empty_trajectory() {
        let traj = Trajectory {
            times: Vec::new(),
            states: Vec::new(),
            controls: Vec::new(),
        };
        assert!(traj.state_at(0.0).is_none());
        assert!(traj.control_at(0.0).is_none());
        assert!(traj.first_control().is_none());
    }
}

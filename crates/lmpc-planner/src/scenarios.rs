//! Follow scenarios
//!
//! Canned traffic situations for the follow controller and a closed-loop
//! rollout that drives the ego vehicle with the controller's jerk while the
//! lead vehicle moves on its own schedule.

use lmpc_core::dynamics::{EgoState, LongitudinalDynamics};
use lmpc_core::math::{integrate_interval, IntegrationError};
use lmpc_core::ControlVector;

use crate::controller::{Controller, SolveStatus};
use crate::cost::CostModel;
use crate::ocp::OnlineParameters;

/// Lead vehicle moving with constant acceleration until it stops
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LeadVehicle {
    /// Position [m]
    pub position: f64,
    /// Velocity [m/s]
    pub velocity: f64,
    /// Acceleration [m/s²]
    pub acceleration: f64,
}

impl LeadVehicle {
    pub fn new(position: f64, velocity: f64, acceleration: f64) -> Self {
        Self {
            position,
            velocity,
            acceleration,
        }
    }

    /// Advance by `dt`, holding at standstill once stopped
    pub fn advance(&mut self, dt: f64) {
        let v_next = self.velocity + self.acceleration * dt;
        if v_next < 0.0 {
            // Stops within the step
            let t_stop = if self.acceleration < 0.0 {
                -self.velocity / self.acceleration
            } else {
                0.0
            };
            self.position += self.velocity * t_stop + 0.5 * self.acceleration * t_stop * t_stop;
            self.velocity = 0.0;
            self.acceleration = 0.0;
        } else {
            self.position += self.velocity * dt + 0.5 * self.acceleration * dt * dt;
            self.velocity = v_next;
        }
    }
}

/// A named initial traffic situation
#[derive(Debug, Clone, PartialEq)]
pub struct FollowScenario {
    pub name: &'static str,
    pub ego: EgoState,
    pub lead: LeadVehicle,
    /// Following time gap [s]
    pub time_gap: f64,
}

impl FollowScenario {
    /// Ego at 20 m/s, lead 40 m ahead at the same speed, 1.5 s gap
    pub fn highway_gap_closing() -> Self {
        Self {
            name: "highway_gap_closing",
            ego: EgoState::new(0.0, 20.0, 0.0),
            lead: LeadVehicle::new(40.0, 20.0, 0.0),
            time_gap: 1.5,
        }
    }

    /// Ego exactly at the desired gap behind a lead of equal speed
    pub fn steady_follow(cost: &CostModel, speed: f64, time_gap: f64) -> Self {
        Self {
            name: "steady_follow",
            ego: EgoState::new(0.0, speed, 0.0),
            lead: LeadVehicle::new(cost.desired_gap(speed, speed, time_gap), speed, 0.0),
            time_gap,
        }
    }

    /// Faster ego approaching a slower lead
    pub fn approaching_slower_lead() -> Self {
        Self {
            name: "approaching_slower_lead",
            ego: EgoState::new(0.0, 25.0, 0.0),
            lead: LeadVehicle::new(80.0, 18.0, 0.0),
            time_gap: 1.8,
        }
    }

    /// Lead braking at 2 m/s² to a full stop
    pub fn lead_braking() -> Self {
        Self {
            name: "lead_braking",
            ego: EgoState::new(0.0, 20.0, 0.0),
            lead: LeadVehicle::new(40.0, 20.0, -2.0),
            time_gap: 1.8,
        }
    }

    /// Both vehicles at rest
    pub fn standstill() -> Self {
        Self {
            name: "standstill",
            ego: EgoState::new(0.0, 0.0, 0.0),
            lead: LeadVehicle::new(5.0, 0.0, 0.0),
            time_gap: 1.8,
        }
    }

    /// Online parameters as seen at the current lead state
    pub fn params(&self) -> OnlineParameters {
        OnlineParameters::new(self.lead.position, self.lead.velocity, self.time_gap)
            .with_lead_acceleration(self.lead.acceleration)
    }
}

/// Recorded closed-loop run
#[derive(Debug, Clone, Default)]
pub struct ClosedLoopRun {
    pub times: Vec<f64>,
    pub ego: Vec<EgoState>,
    pub gaps: Vec<f64>,
    pub jerks: Vec<f64>,
    pub statuses: Vec<SolveStatus>,
}

impl ClosedLoopRun {
    /// Fraction of ticks that converged
    pub fn converged_fraction(&self) -> f64 {
        if self.statuses.is_empty() {
            return 0.0;
        }
        let converged = self
            .statuses
            .iter()
            .filter(|&&s| s == SolveStatus::Converged)
            .count();
        converged as f64 / self.statuses.len() as f64
    }

    pub fn min_gap(&self) -> f64 {
        self.gaps.iter().copied().fold(f64::INFINITY, f64::min)
    }

    pub fn final_gap(&self) -> Option<f64> {
        self.gaps.last().copied()
    }
}

/// Ego plant: exact constant-jerk motion; braking never reverses the car
fn advance_ego(
    model: &LongitudinalDynamics,
    ego: &EgoState,
    jerk: f64,
    dt: f64,
) -> Result<EgoState, IntegrationError> {
    let x = integrate_interval(model, &ego.to_vector(), &ControlVector::new(jerk), dt, 1)?;
    let mut next = EgoState::from_vector(&x);
    if next.velocity < 0.0 {
        next.velocity = 0.0;
        next.acceleration = next.acceleration.max(0.0);
    }
    Ok(next)
}

/// Run the controller against a scenario for `steps` ticks of `period`
pub fn run_closed_loop(
    controller: &mut Controller,
    scenario: &FollowScenario,
    period: f64,
    steps: usize,
) -> Result<ClosedLoopRun, IntegrationError> {
    let model = LongitudinalDynamics::new();
    let mut ego = scenario.ego;
    let mut lead = scenario.lead;
    let mut run = ClosedLoopRun::default();

    for step in 0..steps {
        let params = OnlineParameters::new(lead.position, lead.velocity, scenario.time_gap)
            .with_lead_acceleration(lead.acceleration);
        let dt = if step == 0 { 0.0 } else { period };
        let out = controller.tick(&ego, &params, dt);

        run.times.push(step as f64 * period);
        run.ego.push(ego);
        run.gaps.push(lead.position - ego.position);
        run.jerks.push(out.jerk);
        run.statuses.push(out.status);

        ego = advance_ego(&model, &ego, out.jerk, period)?;
        lead.advance(period);
    }

    Ok(run)
}

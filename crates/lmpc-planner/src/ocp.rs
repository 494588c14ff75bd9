//! Optimal Control Problem (OCP) definition
//!
//! Multiple-shooting formulation of the longitudinal follow problem:
//!
//! ```text
//! min  Σ_k ½‖r(x_k, u_k)‖²_{W_k} + ½‖r_N(x_N)‖²_{W_N}
//! s.t. x_0 = x_init
//!      x_{k+1} = φ_k(x_k, u_k)         (RK4 over interval k)
//!      v_k ≥ 0                          k = 0..=N
//! ```
//!
//! [`OcpDefinition`] holds what is fixed for the lifetime of a controller
//! (grid, cost shape, lead model). [`OcpProblem`] binds one tick's measured
//! state and online parameters and produces the linearizations consumed by
//! the SQP solver.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use lmpc_core::dynamics::{EgoState, LongitudinalDynamics};
use lmpc_core::math::{integrate_interval, integrate_interval_with_sensitivities};
use lmpc_core::{ControlVector, StateVector};
use nalgebra::{Matrix3, Vector3};

use crate::config::{ColdStart, ConfigError, LeadPrediction, PlannerConfig};
use crate::cost::{
    weighted_square, CostModel, LeadState, StageLinearization, StageResidual,
    TerminalLinearization, TerminalResidual,
};
use crate::horizon::Horizon;

/// Rejected tick inputs
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InputError {
    #[error("Invalid {what} dimension: expected {expected}, got {got}")]
    Dimension {
        what: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("Non-finite {field}: {value}")]
    NonFinite { field: &'static str, value: f64 },
    #[error("Time gap must be non-negative, got {0}")]
    NegativeTimeGap(f64),
    #[error("Tick period must be finite and non-negative, got {0}")]
    InvalidPeriod(f64),
}

/// OCP evaluation errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum OcpError {
    #[error("Non-finite value at node {node}")]
    NumericalOverflow { node: usize },
    #[error("Iterate has {got} {what}, expected {expected}")]
    IterateDimension {
        what: &'static str,
        expected: usize,
        got: usize,
    },
}

/// Per-tick external inputs describing the lead vehicle
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OnlineParameters {
    /// Lead position in the ego frame of the measured state [m]
    pub lead_position: f64,
    /// Lead velocity [m/s]
    pub lead_velocity: f64,
    /// Desired following time gap [s]
    pub time_gap: f64,
    /// Lead acceleration [m/s²], zero when not observed
    #[serde(default)]
    pub lead_acceleration: f64,
}

impl OnlineParameters {
    /// Parameter dimension
    pub const DIM: usize = 3;
    /// Parameter dimension including the lead acceleration
    pub const DIM_WITH_ACCELERATION: usize = 4;

    pub fn new(lead_position: f64, lead_velocity: f64, time_gap: f64) -> Self {
        Self {
            lead_position,
            lead_velocity,
            time_gap,
            lead_acceleration: 0.0,
        }
    }

    pub fn with_lead_acceleration(mut self, lead_acceleration: f64) -> Self {
        self.lead_acceleration = lead_acceleration;
        self
    }

    /// Unpack `[lead_position, lead_velocity, time_gap]`, optionally
    /// followed by the lead acceleration
    pub fn from_slice(values: &[f64]) -> Result<Self, InputError> {
        match *values {
            [position, velocity, time_gap] => Ok(Self::new(position, velocity, time_gap)),
            [position, velocity, time_gap, acceleration] => {
                Ok(Self::new(position, velocity, time_gap).with_lead_acceleration(acceleration))
            }
            _ => Err(InputError::Dimension {
                what: "online parameter",
                expected: Self::DIM,
                got: values.len(),
            }),
        }
    }

    pub fn validate(&self) -> Result<(), InputError> {
        let fields = [
            ("lead_position", self.lead_position),
            ("lead_velocity", self.lead_velocity),
            ("time_gap", self.time_gap),
            ("lead_acceleration", self.lead_acceleration),
        ];
        for (field, value) in fields {
            if !value.is_finite() {
                return Err(InputError::NonFinite { field, value });
            }
        }
        if self.time_gap < 0.0 {
            return Err(InputError::NegativeTimeGap(self.time_gap));
        }
        Ok(())
    }
}

/// Reject a measured state with NaN or infinite components
pub fn validate_state(state: &EgoState) -> Result<(), InputError> {
    let fields = [
        ("position", state.position),
        ("velocity", state.velocity),
        ("acceleration", state.acceleration),
    ];
    for (field, value) in fields {
        if !value.is_finite() {
            return Err(InputError::NonFinite { field, value });
        }
    }
    Ok(())
}

impl LeadPrediction {
    /// Lead state at time `t` into the horizon
    pub fn predict(&self, params: &OnlineParameters, t: f64) -> LeadState {
        match self {
            LeadPrediction::ConstantVelocity => LeadState::new(
                params.lead_position + params.lead_velocity * t,
                params.lead_velocity,
            ),
            LeadPrediction::ConstantAcceleration => {
                let (v0, a) = (params.lead_velocity, params.lead_acceleration);
                if a < 0.0 && v0 + a * t <= 0.0 {
                    // Braking lead holds at its stopping point
                    let t_stop = (-v0 / a).max(0.0);
                    let position = params.lead_position + v0 * t_stop + 0.5 * a * t_stop * t_stop;
                    LeadState::new(position, v0.min(0.0))
                } else {
                    LeadState::new(
                        params.lead_position + v0 * t + 0.5 * a * t * t,
                        v0 + a * t,
                    )
                }
            }
            LeadPrediction::Static => LeadState::new(params.lead_position, params.lead_velocity),
        }
    }
}

/// Decision variables of the multiple-shooting problem
#[derive(Debug, Clone, PartialEq)]
pub struct OcpIterate {
    /// Node states (N+1)
    pub states: Vec<StateVector>,
    /// Interval jerks (N)
    pub controls: Vec<f64>,
}

impl OcpIterate {
    /// True when every state and control is a finite number
    pub fn is_finite(&self) -> bool {
        self.states.iter().all(|x| x.iter().all(|v| v.is_finite()))
            && self.controls.iter().all(|u| u.is_finite())
    }
}

/// Linearization of one shooting interval
#[derive(Debug, Clone, PartialEq)]
pub struct IntervalLinearization {
    /// ∂φ_k/∂x_k
    pub a: Matrix3<f64>,
    /// ∂φ_k/∂u_k
    pub b: Vector3<f64>,
    /// φ_k(x_k, u_k) − x_{k+1}
    pub defect: Vector3<f64>,
    pub stage: StageLinearization,
    /// Diagonal of W_k
    pub weights: StageResidual,
}

/// Linearization of the whole OCP at one iterate
#[derive(Debug, Clone, PartialEq)]
pub struct Linearization {
    /// x_init − x_0
    pub initial_defect: Vector3<f64>,
    pub intervals: Vec<IntervalLinearization>,
    pub terminal: TerminalLinearization,
    /// Diagonal of W_N
    pub terminal_weights: TerminalResidual,
    /// Node velocities of the iterate (N+1)
    pub velocities: Vec<f64>,
    /// Objective value at the iterate
    pub objective: f64,
    /// Largest absolute shooting or initial-value defect
    pub defect_violation: f64,
}

/// Time-invariant part of the OCP
#[derive(Debug, Clone)]
pub struct OcpDefinition {
    horizon: Horizon,
    cost: CostModel,
    dynamics: LongitudinalDynamics,
    lead_prediction: LeadPrediction,
}

impl OcpDefinition {
    pub fn new(config: &PlannerConfig) -> Result<Self, ConfigError> {
        config.cost.validate()?;
        config.weights.validate()?;
        Ok(Self {
            horizon: Horizon::new(&config.horizon)?,
            cost: CostModel::new(config.cost, config.weights),
            dynamics: LongitudinalDynamics::new(),
            lead_prediction: config.follow.lead_prediction,
        })
    }

    pub fn horizon(&self) -> &Horizon {
        &self.horizon
    }

    pub fn cost(&self) -> &CostModel {
        &self.cost
    }

    pub fn lead_prediction(&self) -> LeadPrediction {
        self.lead_prediction
    }

    /// Bind the measured state and online data of one tick
    pub fn problem(
        &self,
        state: &EgoState,
        params: &OnlineParameters,
    ) -> Result<OcpProblem<'_>, InputError> {
        validate_state(state)?;
        params.validate()?;

        let leads = self
            .horizon
            .node_times()
            .iter()
            .map(|&t| self.lead_prediction.predict(params, t))
            .collect();

        let weights = self.cost.weights();
        let stage_weights = (0..self.horizon.num_intervals())
            .map(|k| {
                let scale = if weights.scale_by_interval {
                    self.horizon.weight_scale(k)
                } else {
                    1.0
                };
                self.cost.stage_weights(scale)
            })
            .collect();
        let terminal_scale = if weights.scale_by_interval {
            self.horizon.terminal_weight_scale()
        } else {
            1.0
        };

        Ok(OcpProblem {
            definition: self,
            initial_state: state.to_vector(),
            params: *params,
            leads,
            stage_weights,
            terminal_weights: self.cost.terminal_weights(terminal_scale),
        })
    }
}

/// One tick's instance of the OCP
#[derive(Debug, Clone)]
pub struct OcpProblem<'a> {
    definition: &'a OcpDefinition,
    initial_state: StateVector,
    params: OnlineParameters,
    leads: Vec<LeadState>,
    stage_weights: Vec<StageResidual>,
    terminal_weights: TerminalResidual,
}

impl<'a> OcpProblem<'a> {
    pub fn horizon(&self) -> &'a Horizon {
        &self.definition.horizon
    }

    pub fn initial_state(&self) -> &StateVector {
        &self.initial_state
    }

    pub fn params(&self) -> &OnlineParameters {
        &self.params
    }

    /// Predicted lead state at each node (N+1)
    pub fn leads(&self) -> &[LeadState] {
        &self.leads
    }

    /// Forward simulation of the measured state under the given jerks
    pub fn rollout(&self, controls: &[f64]) -> Result<OcpIterate, OcpError> {
        let horizon = self.horizon();
        let n = horizon.num_intervals();
        if controls.len() != n {
            return Err(OcpError::IterateDimension {
                what: "controls",
                expected: n,
                got: controls.len(),
            });
        }

        let mut states = Vec::with_capacity(n + 1);
        let mut x = self.initial_state;
        states.push(x);
        for (k, &u) in controls.iter().enumerate() {
            x = integrate_interval(
                &self.definition.dynamics,
                &x,
                &ControlVector::new(u),
                horizon.duration(k),
                horizon.substeps(k),
            )
            .map_err(|_| OcpError::NumericalOverflow { node: k })?;
            states.push(x);
        }

        Ok(OcpIterate {
            states,
            controls: controls.to_vec(),
        })
    }

    /// Initial guess without a warm start
    pub fn cold_start(&self, mode: ColdStart) -> Result<OcpIterate, OcpError> {
        let n = self.horizon().num_intervals();
        match mode {
            ColdStart::ZeroJerk => self.rollout(&vec![0.0; n]),
            ColdStart::ConstantVelocity => {
                let x0 = self.initial_state;
                let mut states: Vec<StateVector> = self
                    .horizon()
                    .node_times()
                    .iter()
                    .map(|&t| Vector3::new(x0[0] + x0[1] * t, x0[1], 0.0))
                    .collect();
                states[0] = x0;
                Ok(OcpIterate {
                    states,
                    controls: vec![0.0; n],
                })
            }
        }
    }

    /// Residuals, Jacobians, shooting sensitivities and defects at `iterate`
    pub fn linearize(&self, iterate: &OcpIterate) -> Result<Linearization, OcpError> {
        let horizon = self.horizon();
        let n = horizon.num_intervals();
        self.check_dimensions(iterate)?;

        let cost = &self.definition.cost;
        let time_gap = self.params.time_gap;

        let initial_defect = self.initial_state - iterate.states[0];
        let mut defect_violation = initial_defect.amax();
        let mut objective = 0.0;
        let mut intervals = Vec::with_capacity(n);

        for k in 0..n {
            let x = &iterate.states[k];
            let u = iterate.controls[k];

            let sens = integrate_interval_with_sensitivities(
                &self.definition.dynamics,
                x,
                &ControlVector::new(u),
                horizon.duration(k),
                horizon.substeps(k),
            )
            .map_err(|_| OcpError::NumericalOverflow { node: k })?;

            let stage = cost.stage_linearization(x, u, &self.leads[k], time_gap);
            let finite = stage
                .residual
                .iter()
                .chain(stage.jac_x.iter())
                .all(|v| v.is_finite());
            if !finite {
                return Err(OcpError::NumericalOverflow { node: k });
            }

            let defect = sens.state - iterate.states[k + 1];
            defect_violation = defect_violation.max(defect.amax());
            objective += weighted_square(&stage.residual, &self.stage_weights[k]);

            intervals.push(IntervalLinearization {
                a: sens.state_sensitivity,
                b: sens.control_sensitivity,
                defect,
                stage,
                weights: self.stage_weights[k],
            });
        }

        let terminal = cost.terminal_linearization(&iterate.states[n], &self.leads[n], time_gap);
        let finite = terminal
            .residual
            .iter()
            .chain(terminal.jac_x.iter())
            .all(|v| v.is_finite());
        if !finite {
            return Err(OcpError::NumericalOverflow { node: n });
        }
        objective += weighted_square(&terminal.residual, &self.terminal_weights);

        if !objective.is_finite() {
            return Err(OcpError::NumericalOverflow { node: n });
        }

        Ok(Linearization {
            initial_defect,
            intervals,
            terminal,
            terminal_weights: self.terminal_weights,
            velocities: iterate.states.iter().map(|x| x[1]).collect(),
            objective,
            defect_violation,
        })
    }

    fn check_dimensions(&self, iterate: &OcpIterate) -> Result<(), OcpError> {
        let n = self.horizon().num_intervals();
        if iterate.states.len() != n + 1 {
            return Err(OcpError::IterateDimension {
                what: "states",
                expected: n + 1,
                got: iterate.states.len(),
            });
        }
        if iterate.controls.len() != n {
            return Err(OcpError::IterateDimension {
                what: "controls",
                expected: n,
                got: iterate.controls.len(),
            });
        }
        Ok(())
    }
}

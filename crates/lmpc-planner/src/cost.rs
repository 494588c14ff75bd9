//! Follow-distance cost
//!
//! Least-squares residuals of the longitudinal follow problem. The stage
//! residual is
//!
//! ```text
//! r = [ exp(ttc_gain · norm_rw_error)
//!       (gap − desired_gap) / (0.05·v + 0.5)
//!       a · (0.1·v + 1)
//!       j · (0.1·v + 1) ]
//! ```
//!
//! and the terminal residual drops the jerk row. Analytic Jacobians are
//! provided for the Gauss-Newton Hessian.
//!
//! Velocity-dependent scalings (the square root in the range-rate
//! normalisation and the two linear scalings above) are evaluated at
//! `max(v, 0)` so the residuals stay finite at reverse velocities; the
//! velocity constraint keeps converged solutions out of that region.

use nalgebra::{Matrix3, SMatrix, SVector, Vector3};
use serde::{Deserialize, Serialize};

use lmpc_core::StateVector;

use crate::config::{CostParams, CostWeights};

/// Stage residual dimension
pub const NY: usize = 4;
/// Terminal residual dimension
pub const NY_TERMINAL: usize = 3;

pub type StageResidual = SVector<f64, NY>;
pub type TerminalResidual = Vector3<f64>;

/// Predicted lead vehicle at one node
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LeadState {
    /// Position along the lane [m]
    pub position: f64,
    /// Velocity [m/s]
    pub velocity: f64,
}

impl LeadState {
    pub fn new(position: f64, velocity: f64) -> Self {
        Self { position, velocity }
    }
}

/// Stage residual and its Jacobians at one node
#[derive(Debug, Clone, PartialEq)]
pub struct StageLinearization {
    pub residual: StageResidual,
    /// ∂r/∂x
    pub jac_x: SMatrix<f64, NY, 3>,
    /// ∂r/∂j
    pub jac_u: StageResidual,
}

/// Terminal residual and its Jacobian
#[derive(Debug, Clone, PartialEq)]
pub struct TerminalLinearization {
    pub residual: TerminalResidual,
    /// ∂r/∂x
    pub jac_x: Matrix3<f64>,
}

/// Values and (position, velocity) derivatives of the two gap residuals
#[derive(Debug, Clone, Copy)]
struct GapTerms {
    ttc: f64,
    ttc_dp: f64,
    ttc_dv: f64,
    distance: f64,
    distance_dp: f64,
    distance_dv: f64,
}

/// Comfort scaling `0.1·v + 1` and its derivative
fn comfort_scale(v: f64) -> (f64, f64) {
    if v > 0.0 {
        (0.1 * v + 1.0, 0.1)
    } else {
        (1.0, 0.0)
    }
}

/// Follow-distance cost model
#[derive(Debug, Clone, PartialEq)]
pub struct CostModel {
    params: CostParams,
    weights: CostWeights,
}

impl CostModel {
    pub fn new(params: CostParams, weights: CostWeights) -> Self {
        Self { params, weights }
    }

    pub fn params(&self) -> &CostParams {
        &self.params
    }

    pub fn weights(&self) -> &CostWeights {
        &self.weights
    }

    /// Standstill-to-cruise minimum gap [m]
    ///
    /// Strictly increasing in `v`, from `base` towards `base + amplitude`.
    pub fn min_gap(&self, v_ego: f64) -> f64 {
        let s = &self.params.min_gap;
        s.amplitude / (1.0 + (s.offset - s.slope * v_ego).exp()) + s.base
    }

    /// d(min_gap)/dv
    pub fn min_gap_derivative(&self, v_ego: f64) -> f64 {
        let s = &self.params.min_gap;
        let e = (s.offset - s.slope * v_ego).exp();
        s.amplitude * s.slope * e / ((1.0 + e) * (1.0 + e))
    }

    /// Reaction buffer: time-gap headway plus closing-speed term plus the
    /// braking-distance difference [m]
    pub fn reaction_buffer(&self, v_ego: f64, v_lead: f64, time_gap: f64) -> f64 {
        let g = self.params.gravity;
        v_ego * time_gap - (v_lead - v_ego) * time_gap + v_ego * v_ego / (2.0 * g)
            - v_lead * v_lead / (2.0 * g)
    }

    fn reaction_buffer_derivative(&self, v_ego: f64, time_gap: f64) -> f64 {
        2.0 * time_gap + v_ego / self.params.gravity
    }

    /// Gap the controller aims to hold [m]
    pub fn desired_gap(&self, v_ego: f64, v_lead: f64, time_gap: f64) -> f64 {
        self.min_gap(v_ego) + self.reaction_buffer(v_ego, v_lead, time_gap)
    }

    /// Normalised range-rate error
    ///
    /// `(RW + margin − gap) / (sqrt(max(v, 0) + 0.5) + 0.1)`
    pub fn normalized_rw_error(&self, gap: f64, v_ego: f64, v_lead: f64, time_gap: f64) -> f64 {
        let rw = self.reaction_buffer(v_ego, v_lead, time_gap);
        (rw + self.params.safety_margin - gap) / ((v_ego.max(0.0) + 0.5).sqrt() + 0.1)
    }

    fn gap_terms(&self, x: &StateVector, lead: &LeadState, time_gap: f64) -> GapTerms {
        let v = x[1];
        let gap = lead.position - x[0];

        let rw = self.reaction_buffer(v, lead.velocity, time_gap);
        let rw_dv = self.reaction_buffer_derivative(v, time_gap);

        // Range-rate term
        let (den, den_dv) = if v > 0.0 {
            let root = (v + 0.5).sqrt();
            (root + 0.1, 0.5 / root)
        } else {
            (0.5_f64.sqrt() + 0.1, 0.0)
        };
        let numerator = rw + self.params.safety_margin - gap;
        let norm = numerator / den;
        let norm_dp = 1.0 / den;
        let norm_dv = rw_dv / den - numerator * den_dv / (den * den);

        let gain = self.params.ttc_gain;
        let ttc = (gain * norm).exp();

        // Distance tracking term
        let desired = self.min_gap(v) + rw;
        let desired_dv = self.min_gap_derivative(v) + rw_dv;
        let (scale, scale_dv) = if v > 0.0 {
            (0.05 * v + 0.5, 0.05)
        } else {
            (0.5, 0.0)
        };
        let error = gap - desired;

        GapTerms {
            ttc,
            ttc_dp: gain * ttc * norm_dp,
            ttc_dv: gain * ttc * norm_dv,
            distance: error / scale,
            distance_dp: -1.0 / scale,
            distance_dv: -desired_dv / scale - error * scale_dv / (scale * scale),
        }
    }

    /// Stage residual at `(x, jerk)`
    pub fn stage_residual(&self, x: &StateVector, jerk: f64, lead: &LeadState, time_gap: f64) -> StageResidual {
        let terms = self.gap_terms(x, lead, time_gap);
        let (comfort, _) = comfort_scale(x[1]);
        SVector::<f64, NY>::new(terms.ttc, terms.distance, x[2] * comfort, jerk * comfort)
    }

    /// Stage residual with Jacobians
    pub fn stage_linearization(
        &self,
        x: &StateVector,
        jerk: f64,
        lead: &LeadState,
        time_gap: f64,
    ) -> StageLinearization {
        let terms = self.gap_terms(x, lead, time_gap);
        let (comfort, comfort_dv) = comfort_scale(x[1]);
        let a = x[2];

        let residual =
            SVector::<f64, NY>::new(terms.ttc, terms.distance, a * comfort, jerk * comfort);

        let jac_x = SMatrix::<f64, NY, 3>::new(
            terms.ttc_dp, terms.ttc_dv, 0.0,
            terms.distance_dp, terms.distance_dv, 0.0,
            0.0, a * comfort_dv, comfort,
            0.0, jerk * comfort_dv, 0.0,
        );
        let jac_u = SVector::<f64, NY>::new(0.0, 0.0, 0.0, comfort);

        StageLinearization {
            residual,
            jac_x,
            jac_u,
        }
    }

    /// Terminal residual at `x`
    pub fn terminal_residual(&self, x: &StateVector, lead: &LeadState, time_gap: f64) -> TerminalResidual {
        let terms = self.gap_terms(x, lead, time_gap);
        let (comfort, _) = comfort_scale(x[1]);
        Vector3::new(terms.ttc, terms.distance, x[2] * comfort)
    }

    /// Terminal residual with Jacobian
    pub fn terminal_linearization(
        &self,
        x: &StateVector,
        lead: &LeadState,
        time_gap: f64,
    ) -> TerminalLinearization {
        let terms = self.gap_terms(x, lead, time_gap);
        let (comfort, comfort_dv) = comfort_scale(x[1]);
        let a = x[2];

        TerminalLinearization {
            residual: Vector3::new(terms.ttc, terms.distance, a * comfort),
            jac_x: Matrix3::new(
                terms.ttc_dp, terms.ttc_dv, 0.0,
                terms.distance_dp, terms.distance_dv, 0.0,
                0.0, a * comfort_dv, comfort,
            ),
        }
    }

    /// Diagonal stage weights, multiplied by `scale`
    pub fn stage_weights(&self, scale: f64) -> StageResidual {
        let w = &self.weights;
        SVector::<f64, NY>::new(w.ttc, w.distance, w.acceleration, w.jerk) * scale
    }

    /// Diagonal terminal weights, multiplied by `scale`
    pub fn terminal_weights(&self, scale: f64) -> TerminalResidual {
        let w = &self.weights;
        Vector3::new(w.terminal_ttc, w.terminal_distance, w.terminal_acceleration) * scale
    }
}

/// `½ Σ w_i r_i²`
pub fn weighted_square<const D: usize>(residual: &SVector<f64, D>, weights: &SVector<f64, D>) -> f64 {
    0.5 * residual.component_mul(residual).dot(weights)
}

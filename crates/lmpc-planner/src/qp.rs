//! Condensed QP subproblem
//!
//! Each SQP iteration eliminates the state increments through the
//! linearized dynamics
//!
//! ```text
//! Δx_0     = x_init − x_0
//! Δx_{k+1} = A_k Δx_k + B_k Δu_k + c_k
//! ```
//!
//! so that `Δx_k = g_k + G_k Δu` and the QP is posed over the N jerk
//! increments only. The dense QP is solved with the dual active-set method
//! of Goldfarb and Idnani, which starts from the unconstrained minimiser
//! and needs no feasible initial point. A previous active set can be
//! supplied as a hot start.

use nalgebra::allocator::Allocator;
use nalgebra::{
    Cholesky, DMatrix, DVector, DefaultAllocator, DimName, Dyn, Matrix3xX, Matrix4xX, OMatrix,
    OVector, Vector3,
};
use thiserror::Error;

use crate::cost::NY;
use crate::ocp::Linearization;

const EPS: f64 = 1e-12;

/// QP solver errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum QpError {
    #[error("Hessian is not positive definite")]
    NotConvex,
    #[error("Active constraints are linearly dependent")]
    Degenerate,
    #[error("Constraint {constraint} cannot be satisfied")]
    Infeasible { constraint: usize },
    #[error("Active-set iteration limit ({iterations}) reached")]
    MaxIterations { iterations: usize },
}

/// Dense convex QP
///
/// ```text
/// min  ½ wᵀ H w + fᵀ w
/// s.t. C w ≥ d
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct DenseQp {
    pub hessian: DMatrix<f64>,
    pub gradient: DVector<f64>,
    pub constraints: DMatrix<f64>,
    pub lower: DVector<f64>,
}

impl DenseQp {
    pub fn num_variables(&self) -> usize {
        self.gradient.len()
    }

    pub fn num_constraints(&self) -> usize {
        self.lower.len()
    }

    /// Objective value at `w`
    pub fn objective(&self, w: &DVector<f64>) -> f64 {
        0.5 * w.dot(&(&self.hessian * w)) + self.gradient.dot(w)
    }

    /// `C_i w − d_i` (negative when violated)
    pub fn slack(&self, i: usize, w: &DVector<f64>) -> f64 {
        self.constraints.row(i).transpose().dot(w) - self.lower[i]
    }
}

/// QP over the control increments plus the data to recover state increments
#[derive(Debug, Clone)]
pub struct CondensedQp {
    pub qp: DenseQp,
    offsets: Vec<Vector3<f64>>,
    gains: Vec<Matrix3xX<f64>>,
}

impl CondensedQp {
    /// Condense a linearization
    ///
    /// Constraint row k encodes `v_k + Δv_k ≥ 0` for every node k = 0..=N.
    /// Row 0 has no dependence on Δu, so a negative measured velocity makes
    /// the QP infeasible.
    pub fn condense(lin: &Linearization, regularization: f64) -> Self {
        let n = lin.intervals.len();

        let mut offsets = Vec::with_capacity(n + 1);
        let mut gains = Vec::with_capacity(n + 1);
        offsets.push(lin.initial_defect);
        gains.push(Matrix3xX::zeros(n));

        let mut hessian = DMatrix::zeros(n, n);
        let mut gradient = DVector::zeros(n);

        for (k, interval) in lin.intervals.iter().enumerate() {
            let g = &offsets[k];
            let big_g = &gains[k];

            // Stage residual r_k + M_k Δu, M_k = Jx G_k + Ju e_kᵀ
            let mut m: Matrix4xX<f64> = interval.stage.jac_x * big_g;
            for row in 0..NY {
                m[(row, k)] += interval.stage.jac_u[row];
            }
            let residual = interval.stage.residual + interval.stage.jac_x * g;
            accumulate(&mut hessian, &mut gradient, &m, &residual, &interval.weights);

            // Shooting recursion
            let next_offset = interval.a * g + interval.defect;
            let mut next_gain: Matrix3xX<f64> = interval.a * big_g;
            for row in 0..3 {
                next_gain[(row, k)] += interval.b[row];
            }
            offsets.push(next_offset);
            gains.push(next_gain);
        }

        let m: Matrix3xX<f64> = lin.terminal.jac_x * &gains[n];
        let residual = lin.terminal.residual + lin.terminal.jac_x * offsets[n];
        accumulate(&mut hessian, &mut gradient, &m, &residual, &lin.terminal_weights);

        for i in 0..n {
            hessian[(i, i)] += regularization;
        }

        let mut constraints = DMatrix::zeros(n + 1, n);
        let mut lower = DVector::zeros(n + 1);
        for k in 0..=n {
            for j in 0..n {
                constraints[(k, j)] = gains[k][(1, j)];
            }
            lower[k] = -(lin.velocities[k] + offsets[k][1]);
        }

        Self {
            qp: DenseQp {
                hessian,
                gradient,
                constraints,
                lower,
            },
            offsets,
            gains,
        }
    }

    /// State increments Δx_k = g_k + G_k Δu for all nodes
    pub fn expand(&self, step: &DVector<f64>) -> Vec<Vector3<f64>> {
        self.offsets
            .iter()
            .zip(&self.gains)
            .map(|(g, big_g)| g + big_g * step)
            .collect()
    }
}

/// H += Mᵀ W M, f += Mᵀ W m
fn accumulate<R>(
    hessian: &mut DMatrix<f64>,
    gradient: &mut DVector<f64>,
    m: &OMatrix<f64, R, Dyn>,
    residual: &OVector<f64, R>,
    weights: &OVector<f64, R>,
) where
    R: DimName,
    DefaultAllocator: Allocator<R, Dyn> + Allocator<R>,
{
    let mut weighted = m.clone();
    for row in 0..R::dim() {
        weighted.row_mut(row).scale_mut(weights[row]);
    }
    *hessian += m.tr_mul(&weighted);
    *gradient += m.tr_mul(&residual.component_mul(weights));
}

/// QP solution with its active set
#[derive(Debug, Clone, PartialEq)]
pub struct QpSolution {
    /// Optimal w
    pub step: DVector<f64>,
    /// Multiplier of every constraint (zero when inactive)
    pub multipliers: DVector<f64>,
    /// Indices of active constraints
    pub active_set: Vec<usize>,
    /// Active-set changes performed
    pub iterations: usize,
}

/// Goldfarb-Idnani dual active-set solver
#[derive(Debug, Clone)]
pub struct ActiveSetSolver {
    max_iterations: usize,
    tolerance: f64,
}

/// Primal point and current working set
struct WorkingSet {
    x: DVector<f64>,
    active: Vec<usize>,
    multipliers: Vec<f64>,
}

impl ActiveSetSolver {
    pub fn new(max_iterations: usize) -> Self {
        Self {
            max_iterations,
            tolerance: 1e-9,
        }
    }

    /// Solve `qp`, hot-starting from `hot_start` when it is consistent
    pub fn solve(&self, qp: &DenseQp, hot_start: &[usize]) -> Result<QpSolution, QpError> {
        let hinv = Cholesky::new(qp.hessian.clone())
            .ok_or(QpError::NotConvex)?
            .inverse();
        let unconstrained = -(&hinv * &qp.gradient);

        let mut ws = self.initial_point(qp, &hinv, unconstrained, hot_start);
        let mut iterations = 0;

        while let Some(p) = self.most_violated(qp, &ws) {
            let n_p = qp.constraints.row(p).transpose();
            let mut u_p = 0.0;

            loop {
                iterations += 1;
                if iterations > self.max_iterations {
                    return Err(QpError::MaxIterations {
                        iterations: self.max_iterations,
                    });
                }

                let (z, r) = directions(qp, &hinv, &ws.active, &n_p)?;

                // Dual step length: first active multiplier to reach zero
                let mut t1 = f64::INFINITY;
                let mut blocking = None;
                for (j, &rj) in r.iter().enumerate() {
                    if rj > EPS {
                        let t = ws.multipliers[j] / rj;
                        if t < t1 {
                            t1 = t;
                            blocking = Some(j);
                        }
                    }
                }

                // Primal step length: constraint p becomes satisfied
                let zn = z.dot(&n_p);
                let t2 = if z.amax() <= EPS || zn <= EPS {
                    f64::INFINITY
                } else {
                    -qp.slack(p, &ws.x) / zn
                };

                let t = t1.min(t2);
                if !t.is_finite() {
                    return Err(QpError::Infeasible { constraint: p });
                }

                for (u, rj) in ws.multipliers.iter_mut().zip(r.iter()) {
                    *u -= t * rj;
                }
                u_p += t;
                if t2.is_finite() {
                    ws.x += &z * t;
                }

                if t2 <= t1 {
                    ws.active.push(p);
                    ws.multipliers.push(u_p);
                    break;
                }
                if let Some(j) = blocking {
                    ws.active.remove(j);
                    ws.multipliers.remove(j);
                }
            }
        }

        let mut multipliers = DVector::zeros(qp.num_constraints());
        for (&i, &u) in ws.active.iter().zip(&ws.multipliers) {
            multipliers[i] = u.max(0.0);
        }

        Ok(QpSolution {
            step: ws.x,
            multipliers,
            active_set: ws.active,
            iterations,
        })
    }

    /// Equality-constrained optimum on the hot-start set, dropping
    /// constraints with negative multipliers until the rest are consistent
    fn initial_point(
        &self,
        qp: &DenseQp,
        hinv: &DMatrix<f64>,
        unconstrained: DVector<f64>,
        hot_start: &[usize],
    ) -> WorkingSet {
        let mut working: Vec<usize> = hot_start
            .iter()
            .copied()
            .filter(|&i| i < qp.num_constraints() && qp.constraints.row(i).amax() > EPS)
            .collect();
        working.sort_unstable();
        working.dedup();

        while !working.is_empty() {
            let normals = active_normals(qp, &working);
            let hn = hinv * &normals;
            let Some(schur) = Cholesky::new(normals.tr_mul(&hn)) else {
                break;
            };

            let rhs = DVector::from_iterator(
                working.len(),
                working.iter().map(|&i| -qp.slack(i, &unconstrained)),
            );
            let lambda = schur.solve(&rhs);

            let most_negative = lambda
                .iter()
                .enumerate()
                .filter(|&(_, &l)| l < -self.tolerance)
                .min_by(|a, b| a.1.total_cmp(b.1))
                .map(|(j, _)| j);

            match most_negative {
                Some(j) => {
                    working.remove(j);
                }
                None => {
                    let x = &unconstrained + &hn * &lambda;
                    return WorkingSet {
                        x,
                        active: working,
                        multipliers: lambda.iter().map(|l| l.max(0.0)).collect(),
                    };
                }
            }
        }

        WorkingSet {
            x: unconstrained,
            active: Vec::new(),
            multipliers: Vec::new(),
        }
    }

    fn most_violated(&self, qp: &DenseQp, ws: &WorkingSet) -> Option<usize> {
        (0..qp.num_constraints())
            .filter(|i| !ws.active.contains(i))
            .map(|i| (i, qp.slack(i, &ws.x)))
            .filter(|&(i, s)| s < -self.tolerance * (1.0 + qp.lower[i].abs()))
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(i, _)| i)
    }
}

/// Columns are the normals of the given constraints
fn active_normals(qp: &DenseQp, active: &[usize]) -> DMatrix<f64> {
    DMatrix::from_fn(qp.num_variables(), active.len(), |i, j| {
        qp.constraints[(active[j], i)]
    })
}

/// Primal direction z and dual direction r for adding normal `n_p`
fn directions(
    qp: &DenseQp,
    hinv: &DMatrix<f64>,
    active: &[usize],
    n_p: &DVector<f64>,
) -> Result<(DVector<f64>, DVector<f64>), QpError> {
    let hn_p = hinv * n_p;
    if active.is_empty() {
        return Ok((hn_p, DVector::zeros(0)));
    }

    let normals = active_normals(qp, active);
    let hn = hinv * &normals;
    let schur = Cholesky::new(normals.tr_mul(&hn)).ok_or(QpError::Degenerate)?;
    let r = schur.solve(&hn.tr_mul(n_p));
    let z = hn_p - &hn * &r;
    Ok((z, r))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ColdStart, PlannerConfig};
    use crate::ocp::{OcpDefinition, OnlineParameters};
    use approx::assert_relative_eq;
    use lmpc_core::dynamics::EgoState;

    fn qp(h: &[f64], f: &[f64], c: &[f64], d: &[f64]) -> DenseQp {
        let n = f.len();
        DenseQp {
            hessian: DMatrix::from_row_slice(n, n, h),
            gradient: DVector::from_column_slice(f),
            constraints: DMatrix::from_row_slice(d.len(), n, c),
            lower: DVector::from_column_slice(d),
        }
    }

    #[test]
    fn test_unconstrained() {
        let problem = qp(&[2.0, 0.0, 0.0, 4.0], &[-2.0, -4.0], &[], &[]);
        let sol = ActiveSetSolver::new(10).solve(&problem, &[]).unwrap();

        assert_relative_eq!(sol.step, DVector::from_column_slice(&[1.0, 1.0]), epsilon = 1e-12);
        assert!(sol.active_set.is_empty());
        assert_eq!(sol.iterations, 0);
    }

    #[test]
    fn test_single_active_constraint() {
        // min (x−1)² + (y−1)²  s.t.  x + y ≤ 1
        let problem = qp(&[2.0, 0.0, 0.0, 2.0], &[-2.0, -2.0], &[-1.0, -1.0, 1.0, 0.0], &[-1.0, -5.0]);
        let sol = ActiveSetSolver::new(10).solve(&problem, &[]).unwrap();

        assert_relative_eq!(sol.step, DVector::from_column_slice(&[0.5, 0.5]), epsilon = 1e-12);
        assert_eq!(sol.active_set, vec![0]);
        assert_relative_eq!(sol.multipliers[0], 1.0, epsilon = 1e-12);
        assert_eq!(sol.multipliers[1], 0.0);
    }

    #[test]
    fn test_hot_start_reuses_active_set() {
        let problem = qp(&[2.0, 0.0, 0.0, 2.0], &[-2.0, -2.0], &[-1.0, -1.0, 1.0, 0.0], &[-1.0, -5.0]);
        let sol = ActiveSetSolver::new(10).solve(&problem, &[0]).unwrap();

        assert_eq!(sol.iterations, 0);
        assert_eq!(sol.active_set, vec![0]);
        assert_relative_eq!(sol.step, DVector::from_column_slice(&[0.5, 0.5]), epsilon = 1e-12);
    }

    #[test]
    fn test_hot_start_drops_wrong_guess() {
        // x ≥ −1 would need a negative multiplier to be held active
        let problem = qp(&[2.0, 0.0, 0.0, 2.0], &[-2.0, -2.0], &[1.0, 0.0], &[-1.0]);
        let sol = ActiveSetSolver::new(10).solve(&problem, &[0, 7]).unwrap();

        assert!(sol.active_set.is_empty());
        assert_relative_eq!(sol.step, DVector::from_column_slice(&[1.0, 1.0]), epsilon = 1e-12);
    }

    #[test]
    fn test_two_active_constraints() {
        // min ½‖w‖² − w₀ − w₁  s.t.  w₀ ≥ 2, w₀ + w₁ ≤ 1.5
        let problem = qp(
            &[1.0, 0.0, 0.0, 1.0],
            &[-1.0, -1.0],
            &[1.0, 0.0, -1.0, -1.0],
            &[2.0, -1.5],
        );
        let sol = ActiveSetSolver::new(20).solve(&problem, &[]).unwrap();

        assert_relative_eq!(sol.step[0], 2.0, epsilon = 1e-9);
        assert_relative_eq!(sol.step[1], -0.5, epsilon = 1e-9);
        assert_relative_eq!(sol.multipliers[0], 2.5, epsilon = 1e-9);
        assert_relative_eq!(sol.multipliers[1], 1.5, epsilon = 1e-9);
    }

    #[test]
    fn test_constraint_dropped_during_solve() {
        // 10·w₀ ≥ 10 is added first and released once w₀ − w₁ ≥ 3 is active
        let problem = qp(
            &[1.0, 0.0, 0.0, 1.0],
            &[0.0, 0.0],
            &[10.0, 0.0, 1.0, -1.0],
            &[10.0, 3.0],
        );
        let sol = ActiveSetSolver::new(20).solve(&problem, &[]).unwrap();

        assert_relative_eq!(sol.step, DVector::from_column_slice(&[1.5, -1.5]), epsilon = 1e-9);
        assert_eq!(sol.active_set, vec![1]);
        assert_eq!(sol.multipliers[0], 0.0);
        assert_relative_eq!(sol.multipliers[1], 1.5, epsilon = 1e-9);
        assert_eq!(sol.iterations, 3);
    }

    #[test]
    fn test_infeasible_pair() {
        // x ≥ 1 and x ≤ 0
        let problem = qp(&[1.0], &[0.0], &[1.0, -1.0], &[1.0, 0.0]);
        let err = ActiveSetSolver::new(10).solve(&problem, &[]).unwrap_err();
        assert_eq!(err, QpError::Infeasible { constraint: 1 });
    }

    #[test]
    fn test_infeasible_constant_row() {
        // 0·x ≥ 1
        let problem = qp(&[1.0, 0.0, 0.0, 1.0], &[0.0, 0.0], &[0.0, 0.0], &[1.0]);
        let err = ActiveSetSolver::new(10).solve(&problem, &[]).unwrap_err();
        assert_eq!(err, QpError::Infeasible { constraint: 0 });
    }

    #[test]
    fn test_iteration_limit() {
        let problem = qp(&[1.0, 0.0, 0.0, 1.0], &[0.0, 0.0], &[1.0, 0.0, 0.0, 1.0], &[1.0, 1.0]);
        let err = ActiveSetSolver::new(1).solve(&problem, &[]).unwrap_err();
        assert_eq!(err, QpError::MaxIterations { iterations: 1 });
    }

    #[test]
    fn test_not_convex() {
        let problem = qp(&[-1.0], &[0.0], &[], &[]);
        assert_eq!(
            ActiveSetSolver::new(10).solve(&problem, &[]).unwrap_err(),
            QpError::NotConvex
        );
    }

    #[test]
    fn test_expansion_follows_linearized_dynamics() {
        let ocp = OcpDefinition::new(&PlannerConfig::default()).unwrap();
        let problem = ocp
            .problem(&EgoState::new(0.0, 18.0, 0.3), &OnlineParameters::new(30.0, 20.0, 1.5))
            .unwrap();
        let mut iterate = problem.cold_start(ColdStart::ConstantVelocity).unwrap();
        iterate.states[0][1] += 0.2;
        let lin = problem.linearize(&iterate).unwrap();

        let condensed = CondensedQp::condense(&lin, 0.0);
        let step = DVector::from_fn(20, |k, _| 0.05 * (k as f64 - 10.0));
        let dx = condensed.expand(&step);

        assert_eq!(dx.len(), 21);
        assert_relative_eq!(dx[0], lin.initial_defect, epsilon = 1e-12);
        for (k, interval) in lin.intervals.iter().enumerate() {
            let expected = interval.a * dx[k] + interval.b * step[k] + interval.defect;
            assert_relative_eq!(dx[k + 1], expected, epsilon = 1e-9);
        }

        // Constraint rows are the linearized node velocities
        for k in 0..=20 {
            let velocity = lin.velocities[k] + dx[k][1];
            assert_relative_eq!(condensed.qp.slack(k, &step), velocity, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_condensed_objective_matches_gauss_newton_model() {
        let ocp = OcpDefinition::new(&PlannerConfig::default()).unwrap();
        let problem = ocp
            .problem(&EgoState::new(0.0, 18.0, 0.3), &OnlineParameters::new(30.0, 20.0, 1.5))
            .unwrap();
        let iterate = problem.cold_start(ColdStart::ZeroJerk).unwrap();
        let lin = problem.linearize(&iterate).unwrap();

        let condensed = CondensedQp::condense(&lin, 0.0);
        let step = DVector::from_fn(20, |k, _| 0.01 * k as f64);
        let dx = condensed.expand(&step);

        let mut model = 0.0;
        for (k, interval) in lin.intervals.iter().enumerate() {
            let r = interval.stage.residual + interval.stage.jac_x * dx[k] + interval.stage.jac_u * step[k];
            model += crate::cost::weighted_square(&r, &interval.weights);
        }
        let r = lin.terminal.residual + lin.terminal.jac_x * dx[20];
        model += crate::cost::weighted_square(&r, &lin.terminal_weights);

        let predicted = lin.objective + condensed.qp.objective(&step);
        assert_relative_eq!(predicted, model, epsilon = 1e-9, max_relative = 1e-9);
    }
}

//! Follow Controller Property Tests
//!
//! End-to-end checks of the follow OCP through the public API: convergence
//! on benign inputs, shape of the minimum-gap curve, the fixed point at the
//! desired gap, warm-start reuse, forward-motion infeasibility and the
//! highway gap-closing manoeuvre.

use approx::assert_relative_eq;

use lmpc_core::dynamics::EgoState;
use lmpc_planner::config::{CostParams, CostWeights, HorizonConfig, PlannerConfig};
use lmpc_planner::{
    Controller, CostModel, FallbackReason, Horizon, OcpDefinition, OnlineParameters, SolveStatus,
    SqpSolver,
};
use lmpc_planner::solver::SolveOptions;

fn cost_model() -> CostModel {
    CostModel::new(CostParams::default(), CostWeights::default())
}

mod convergence_tests {
    use super::*;

    #[test]
    fn test_benign_inputs_converge() {
        let config = PlannerConfig::default();
        let ocp = OcpDefinition::new(&config).unwrap();
        let mut solver = SqpSolver::new(SolveOptions::from(&config.solver));

        for &speed in &[5.0, 10.0, 20.0, 30.0] {
            let gap = ocp.cost().desired_gap(speed, speed, 1.8);
            let problem = ocp
                .problem(&EgoState::new(0.0, speed, 0.0), &OnlineParameters::new(gap, speed, 1.8))
                .unwrap();

            let solution = solver.solve(&problem, None).unwrap();
            assert!(solution.statistics.sqp_iterations <= config.solver.max_iterations);
            assert!(solution.statistics.defect_violation <= config.solver.defect_tolerance);
            assert!(solution.trajectory.min_velocity() >= -1e-6);
        }
    }

    #[test]
    fn test_desired_gap_is_fixed_point_without_ttc() {
        let mut config = PlannerConfig::default();
        config.weights.ttc = 0.0;
        config.weights.terminal_ttc = 0.0;
        let mut controller = Controller::new(config).unwrap();

        let speed = 15.0;
        let gap = controller.ocp().cost().desired_gap(speed, speed, 1.8);
        let out = controller.tick(&EgoState::new(0.0, speed, 0.0), &OnlineParameters::new(gap, speed, 1.8), 0.0);

        assert_eq!(out.status, SolveStatus::Converged);
        assert_relative_eq!(out.jerk, 0.0, epsilon = 1e-9);
        let trajectory = out.trajectory.unwrap();
        for &jerk in &trajectory.controls {
            assert_relative_eq!(jerk, 0.0, epsilon = 1e-9);
        }
        for state in &trajectory.states {
            assert_relative_eq!(state.velocity, speed, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_warm_started_resolve_is_cheap() {
        let mut controller = Controller::new(PlannerConfig::default()).unwrap();
        let ego = EgoState::new(0.0, 20.0, 0.0);
        let params = OnlineParameters::new(40.0, 20.0, 1.5);

        let first = controller.tick(&ego, &params, 0.0);
        assert_eq!(first.status, SolveStatus::Converged);
        assert!(!first.statistics.warm_started);

        let second = controller.tick(&ego, &params, 0.0);
        assert_eq!(second.status, SolveStatus::Converged);
        assert!(second.statistics.warm_started);
        assert!(second.statistics.sqp_iterations <= 2);
        assert_relative_eq!(second.jerk, first.jerk, epsilon = 1e-3);
    }
}

mod min_gap_tests {
    use super::*;

    #[test]
    fn test_min_gap_rises_with_speed_within_bounds() {
        let cost = cost_model();
        let mut previous = cost.min_gap(0.0);
        assert_relative_eq!(previous, 1.5243, epsilon = 1e-4);

        for i in 1..=60 {
            let v = 0.5 * i as f64;
            let gap = cost.min_gap(v);
            assert!(gap >= previous);
            assert!(gap > 1.25 && gap < 4.0);
            previous = gap;
        }
    }

    #[test]
    fn test_desired_gap_grows_with_time_gap() {
        let cost = cost_model();
        let short = cost.desired_gap(20.0, 20.0, 1.0);
        let long = cost.desired_gap(20.0, 20.0, 2.0);
        assert_relative_eq!(long - short, 20.0, epsilon = 1e-9);
    }
}

mod feasibility_tests {
    use super::*;

    #[test]
    fn test_reversing_ego_is_infeasible() {
        let mut controller = Controller::new(PlannerConfig::default()).unwrap();
        let out = controller.tick(&EgoState::new(0.0, -0.5, 0.0), &OnlineParameters::new(30.0, 5.0, 1.8), 0.0);

        assert_eq!(out.status, SolveStatus::Fallback);
        assert_eq!(out.fallback_reason, Some(FallbackReason::Infeasible { node: 0 }));
        assert!(out.trajectory.is_none());
    }

    #[test]
    fn test_braking_plan_keeps_forward_motion() {
        let mut controller = Controller::new(PlannerConfig::default()).unwrap();
        let out = controller.tick(&EgoState::new(0.0, 8.0, 0.0), &OnlineParameters::new(25.0, 0.0, 1.8), 0.0);

        let trajectory = out.trajectory.unwrap();
        assert!(trajectory.min_velocity() >= -1e-6);
        assert!(out.jerk < 0.0);
    }

    #[test]
    fn test_braking_lead_is_anticipated() {
        let ego = EgoState::new(0.0, 20.0, 0.0);
        let cruising = OnlineParameters::new(40.0, 20.0, 1.8);
        let braking = cruising.with_lead_acceleration(-2.0);

        let steady = Controller::new(PlannerConfig::default()).unwrap().tick(&ego, &cruising, 0.0);
        let out = Controller::new(PlannerConfig::default()).unwrap().tick(&ego, &braking, 0.0);

        assert_eq!(out.status, SolveStatus::Converged);
        assert!(out.jerk < 0.0);
        assert!(out.jerk < steady.jerk);

        // The plan stays behind the predicted stopping point of the lead
        let trajectory = out.trajectory.unwrap();
        assert!(trajectory.states[20].position < 140.0);
    }
}

mod highway_tests {
    use super::*;

    #[test]
    fn test_gap_closing_plan() {
        // Desired gap 30 m + min_gap(20) ≈ 34 m; the lead starts 40 m ahead
        let mut controller = Controller::new(PlannerConfig::default()).unwrap();
        let out = controller.tick(&EgoState::new(0.0, 20.0, 0.0), &OnlineParameters::new(40.0, 20.0, 1.5), 0.0);

        assert_eq!(out.status, SolveStatus::Converged);
        assert!(out.acceleration > 0.0);

        let trajectory = out.trajectory.unwrap();
        let problem = controller
            .ocp()
            .problem(&EgoState::new(0.0, 20.0, 0.0), &OnlineParameters::new(40.0, 20.0, 1.5))
            .unwrap();
        let gaps = trajectory.gaps(problem.leads());
        let terminal = gaps[gaps.len() - 1];
        assert!(terminal < 40.0 && terminal > 34.0);
        assert!(trajectory.controls[trajectory.controls.len() - 1].abs() < 0.1);
    }
}

mod horizon_tests {
    use super::*;

    #[test]
    fn test_horizon_spans_ten_seconds_for_any_substeps() {
        for substeps in 1..=5 {
            let mut config = HorizonConfig::default();
            for segment in &mut config.segments {
                segment.substeps = substeps;
            }
            let horizon = Horizon::new(&config).unwrap();

            assert_eq!(horizon.num_intervals(), 20);
            assert_relative_eq!(horizon.durations().iter().sum::<f64>(), 10.0, epsilon = 1e-12);
            assert_eq!(horizon.node_times()[20], 10.0);
            assert_relative_eq!(horizon.duration(0), 0.2, epsilon = 1e-12);
            assert_relative_eq!(horizon.duration(19), 0.6, epsilon = 1e-12);
        }
    }
}

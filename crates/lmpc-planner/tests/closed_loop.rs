//! Closed-Loop Tests
//!
//! Drives the ego vehicle with the controller's jerk at 10 Hz while the lead
//! follows its own schedule, and checks the resulting gap and speed.

use lmpc_planner::scenarios::{run_closed_loop, FollowScenario};
use lmpc_planner::{Controller, PlannerConfig};

const PERIOD: f64 = 0.1;

fn controller() -> Controller {
    Controller::new(PlannerConfig::default()).unwrap()
}

#[test]
fn test_highway_gap_closes_towards_desired() {
    let scenario = FollowScenario::highway_gap_closing();
    let run = run_closed_loop(&mut controller(), &scenario, PERIOD, 300).unwrap();

    let final_gap = run.final_gap().unwrap();
    assert!(final_gap < 40.0 && final_gap > 34.0, "final gap {final_gap}");

    let final_speed = run.ego[run.ego.len() - 1].velocity;
    assert!((final_speed - 20.0).abs() < 2.0, "final speed {final_speed}");
    assert!(run.converged_fraction() > 0.9);
}

#[test]
fn test_steady_follow_stays_put() {
    let mut controller = controller();
    let scenario = FollowScenario::steady_follow(controller.ocp().cost(), 20.0, 1.8);
    let start_gap = scenario.lead.position - scenario.ego.position;
    let run = run_closed_loop(&mut controller, &scenario, PERIOD, 100).unwrap();

    for gap in &run.gaps {
        assert!((gap - start_gap).abs() < 8.0);
    }
    for jerk in &run.jerks {
        assert!(jerk.abs() < 1.0);
    }
}

#[test]
fn test_approaching_slower_lead_slows_down() {
    let scenario = FollowScenario::approaching_slower_lead();
    let run = run_closed_loop(&mut controller(), &scenario, PERIOD, 400).unwrap();

    assert!(run.min_gap() > 5.0, "min gap {}", run.min_gap());
    let final_speed = run.ego[run.ego.len() - 1].velocity;
    assert!(final_speed < 21.0, "final speed {final_speed}");
}

#[test]
fn test_lead_braking_to_stop() {
    let scenario = FollowScenario::lead_braking();
    let run = run_closed_loop(&mut controller(), &scenario, PERIOD, 250).unwrap();

    assert!(run.min_gap() > 0.5, "min gap {}", run.min_gap());
    assert!(run.ego.iter().all(|s| s.velocity >= 0.0));
    let final_speed = run.ego[run.ego.len() - 1].velocity;
    assert!(final_speed < 0.5, "final speed {final_speed}");
}

#[test]
fn test_standstill_never_reverses() {
    let scenario = FollowScenario::standstill();
    let run = run_closed_loop(&mut controller(), &scenario, PERIOD, 50).unwrap();

    assert!(run.min_gap() > 0.5);
    assert!(run.ego.iter().all(|s| s.velocity >= 0.0));
}

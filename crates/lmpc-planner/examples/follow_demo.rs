//! Follow Controller Demonstration
//!
//! Runs every canned scenario in closed loop at 10 Hz and prints a short
//! summary per scenario. Pass a TOML file to override the default
//! configuration:
//!
//! ```text
//! cargo run --example follow_demo -- planner.toml
//! ```

use lmpc_planner::scenarios::{run_closed_loop, FollowScenario};
use lmpc_planner::{Controller, PlannerConfig};

fn main() {
    println!("=== Longitudinal Follow MPC ===\n");

    let config = match std::env::args().nth(1) {
        Some(path) => match PlannerConfig::from_file(&path) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("Failed to load {path}: {err}");
                std::process::exit(1);
            }
        },
        None => PlannerConfig::default(),
    };

    let mut controller = match Controller::new(config) {
        Ok(controller) => controller,
        Err(err) => {
            eprintln!("Invalid configuration: {err}");
            std::process::exit(1);
        }
    };

    let scenarios = vec![
        FollowScenario::highway_gap_closing(),
        FollowScenario::steady_follow(controller.ocp().cost(), 20.0, 1.8),
        FollowScenario::approaching_slower_lead(),
        FollowScenario::lead_braking(),
        FollowScenario::standstill(),
    ];

    let period = 0.1;
    let steps = 300;

    for scenario in &scenarios {
        controller.reset();
        let run = match run_closed_loop(&mut controller, scenario, period, steps) {
            Ok(run) => run,
            Err(err) => {
                eprintln!("{}: plant integration failed: {err}", scenario.name);
                continue;
            }
        };

        println!("--- {} ---", scenario.name);
        for k in (0..run.times.len()).step_by(50) {
            println!(
                "  t={:5.1}s  v={:6.2} m/s  a={:6.2} m/s²  gap={:7.2} m  jerk={:6.2}",
                run.times[k], run.ego[k].velocity, run.ego[k].acceleration, run.gaps[k], run.jerks[k]
            );
        }
        println!(
            "  min gap {:.2} m, converged {:.0}% of ticks\n",
            run.min_gap(),
            100.0 * run.converged_fraction()
        );
    }
}

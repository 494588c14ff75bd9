//! Warm-start cache
//!
//! Keeps the last converged trajectory and its constraint multipliers and
//! turns them into an initial iterate for the next tick. The stored
//! solution is resampled on the shooting grid shifted by the time elapsed
//! since it was computed, rather than seeding from the raw measurement.

use log::debug;

use crate::horizon::Horizon;
use crate::ocp::OcpIterate;
use crate::solver::Seed;
use crate::trajectory::Trajectory;

/// A stored converged solution
#[derive(Debug, Clone, PartialEq)]
pub struct WarmStart {
    pub trajectory: Trajectory,
    /// Velocity-constraint multipliers, one per node
    pub multipliers: Vec<f64>,
}

/// Last converged solution plus the time elapsed since it was stored
#[derive(Debug, Clone, Default)]
pub struct WarmStartCache {
    entry: Option<WarmStart>,
    elapsed: f64,
}

impl WarmStartCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the cached solution
    pub fn store(&mut self, trajectory: Trajectory, multipliers: Vec<f64>) {
        self.entry = Some(WarmStart {
            trajectory,
            multipliers,
        });
        self.elapsed = 0.0;
    }

    /// Discard the cached solution
    pub fn reset(&mut self) {
        if self.entry.is_some() {
            debug!("Warm-start cache cleared");
        }
        self.entry = None;
        self.elapsed = 0.0;
    }

    pub fn is_empty(&self) -> bool {
        self.entry.is_none()
    }

    pub fn get(&self) -> Option<&WarmStart> {
        self.entry.as_ref()
    }

    /// Account for time passing between ticks [s]
    pub fn advance(&mut self, dt: f64) {
        if self.entry.is_some() {
            self.elapsed += dt;
        }
    }

    /// Time since the cached solution was stored [s]
    pub fn elapsed(&self) -> f64 {
        self.elapsed
    }

    /// Initial iterate for the current tick
    ///
    /// States are resampled at `t_k + elapsed` (exact constant-jerk
    /// interpolation, zero-jerk extrapolation past the stored horizon) and
    /// jerks with a zero-order hold. Active constraints carry over to the
    /// node they shift onto. Returns `None` when the cache is empty, older
    /// than the horizon, or built on a different grid.
    pub fn seed(&self, horizon: &Horizon) -> Option<Seed> {
        let entry = self.entry.as_ref()?;
        let trajectory = &entry.trajectory;

        if trajectory.states.len() != horizon.num_nodes() || self.elapsed > trajectory.duration() {
            return None;
        }

        let states = horizon
            .node_times()
            .iter()
            .map(|&t| trajectory.state_at(t + self.elapsed).map(|s| s.to_vector()))
            .collect::<Option<Vec<_>>>()?;

        let controls = horizon.node_times()[..horizon.num_intervals()]
            .iter()
            .map(|&t| trajectory.control_at(t + self.elapsed))
            .collect::<Option<Vec<_>>>()?;

        let active_set = entry
            .multipliers
            .iter()
            .enumerate()
            .filter(|&(_, &m)| m > 0.0)
            .filter_map(|(i, _)| trajectory.times.get(i))
            .filter_map(|&t| horizon.node_at(t - self.elapsed))
            .collect();

        Some(Seed {
            iterate: OcpIterate { states, controls },
            active_set,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HorizonConfig;
    use approx::assert_relative_eq;
    use lmpc_core::dynamics::LongitudinalDynamics;
    use lmpc_core::math::integrate_interval;
    use lmpc_core::{ControlVector, StateVector};

    fn horizon() -> Horizon {
        Horizon::new(&HorizonConfig::default()).unwrap()
    }

    /// Dynamically consistent trajectory with a varying jerk profile
    fn stored(horizon: &Horizon) -> Trajectory {
        let model = LongitudinalDynamics::new();
        let controls: Vec<f64> = (0..20).map(|k| 0.1 * (k as f64 - 8.0)).collect();
        let mut states = vec![StateVector::new(0.0, 15.0, 0.5)];
        for (k, &u) in controls.iter().enumerate() {
            let x = integrate_interval(&model, &states[k], &ControlVector::new(u), horizon.duration(k), 1)
                .unwrap();
            states.push(x);
        }
        Trajectory::from_iterate(horizon, &OcpIterate { states, controls })
    }

    #[test]
    fn test_empty_cache_gives_no_seed() {
        let cache = WarmStartCache::new();
        assert!(cache.is_empty());
        assert!(cache.seed(&horizon()).is_none());
    }

    #[test]
    fn test_seed_without_elapsed_time_is_exact() {
        let horizon = horizon();
        let trajectory = stored(&horizon);
        let mut multipliers = vec![0.0; 21];
        multipliers[7] = 0.3;

        let mut cache = WarmStartCache::new();
        cache.store(trajectory.clone(), multipliers);

        let seed = cache.seed(&horizon).unwrap();
        assert_eq!(seed.iterate.controls, trajectory.controls);
        for (seeded, original) in seed.iterate.states.iter().zip(&trajectory.states) {
            assert_relative_eq!(*seeded, original.to_vector(), epsilon = 1e-12);
        }
        assert_eq!(seed.active_set, vec![7]);
    }

    #[test]
    fn test_seed_shifts_by_elapsed_time() {
        let horizon = horizon();
        let trajectory = stored(&horizon);
        let mut multipliers = vec![0.0; 21];
        multipliers[3] = 1.0;
        multipliers[1] = 0.5;

        let mut cache = WarmStartCache::new();
        cache.store(trajectory.clone(), multipliers);
        cache.advance(0.2);

        let seed = cache.seed(&horizon).unwrap();
        assert_relative_eq!(seed.iterate.states[0], trajectory.states[1].to_vector(), epsilon = 1e-9);
        assert_relative_eq!(seed.iterate.states[1], trajectory.states[2].to_vector(), epsilon = 1e-9);
        assert_relative_eq!(seed.iterate.controls[0], trajectory.controls[1]);
        // Old nodes 1 and 3 land on new nodes 0 and 2
        assert_eq!(seed.active_set, vec![0, 2]);

        // Inside the coarse part the grid no longer lines up: exact interpolation
        let t = horizon.node_times()[10] + 0.2;
        let expected = trajectory.state_at(t).unwrap().to_vector();
        assert_relative_eq!(seed.iterate.states[10], expected, epsilon = 1e-12);
    }

    #[test]
    fn test_seed_extrapolates_past_horizon() {
        let horizon = horizon();
        let trajectory = stored(&horizon);

        let mut cache = WarmStartCache::new();
        cache.store(trajectory.clone(), vec![0.0; 21]);
        cache.advance(1.0);

        let seed = cache.seed(&horizon).unwrap();
        assert_eq!(seed.iterate.controls[19], 0.0);

        let end = trajectory.states[20];
        let last = seed.iterate.states[20];
        assert_relative_eq!(last[2], end.acceleration, epsilon = 1e-12);
        assert_relative_eq!(last[1], end.velocity + end.acceleration, epsilon = 1e-9);
    }

    #[test]
    fn test_stale_seed_discarded() {
        let horizon = horizon();
        let mut cache = WarmStartCache::new();
        cache.store(stored(&horizon), vec![0.0; 21]);
        cache.advance(10.5);

        assert!(cache.seed(&horizon).is_none());
        assert!(!cache.is_empty());
    }

    #[test]
    fn test_reset_and_store_clear_elapsed() {
        let horizon = horizon();
        let mut cache = WarmStartCache::new();

        // Time does not accumulate while empty
        cache.advance(3.0);
        assert_eq!(cache.elapsed(), 0.0);

        cache.store(stored(&horizon), vec![0.0; 21]);
        cache.advance(0.05);
        cache.advance(0.05);
        assert_relative_eq!(cache.elapsed(), 0.1);

        cache.reset();
        assert!(cache.is_empty());
        assert_eq!(cache.elapsed(), 0.0);
        assert!(cache.get().is_none());
    }
}

//! Shooting grid over the prediction horizon
//!
//! Turns a [`HorizonConfig`] into the concrete list of interval durations,
//! substep counts and node times used by the OCP. The grid is fixed for the
//! lifetime of a controller.

use crate::config::{ConfigError, HorizonConfig};

/// Non-uniform shooting grid with N intervals and N+1 nodes
#[derive(Debug, Clone, PartialEq)]
pub struct Horizon {
    durations: Vec<f64>,
    substeps: Vec<usize>,
    node_times: Vec<f64>,
}

impl Horizon {
    /// Build the grid. Fails if the configuration is invalid.
    pub fn new(config: &HorizonConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let durations = config.compute_intervals();
        let substeps = config.compute_substeps();

        let mut node_times = Vec::with_capacity(durations.len() + 1);
        let mut t = 0.0;
        node_times.push(t);
        for dt in &durations {
            t += dt;
            node_times.push(t);
        }
        // Pin the last node so the grid spans the horizon exactly
        if let Some(last) = node_times.last_mut() {
            *last = config.horizon_time;
        }

        Ok(Self {
            durations,
            substeps,
            node_times,
        })
    }

    /// Number of shooting intervals (N)
    pub fn num_intervals(&self) -> usize {
        self.durations.len()
    }

    /// Number of nodes (N+1)
    pub fn num_nodes(&self) -> usize {
        self.node_times.len()
    }

    /// Duration of interval k [s]
    pub fn duration(&self, k: usize) -> f64 {
        self.durations[k]
    }

    /// RK4 substeps of interval k
    pub fn substeps(&self, k: usize) -> usize {
        self.substeps[k]
    }

    pub fn durations(&self) -> &[f64] {
        &self.durations
    }

    /// Node time stamps relative to the start of the horizon [s]
    pub fn node_times(&self) -> &[f64] {
        &self.node_times
    }

    /// Total horizon length [s]
    pub fn total_duration(&self) -> f64 {
        self.node_times.last().copied().unwrap_or(0.0)
    }

    /// Weight multiplier of interval k (its duration relative to the first)
    pub fn weight_scale(&self, k: usize) -> f64 {
        self.durations[k] / self.durations[0]
    }

    /// Weight multiplier of the terminal node (the last interval's scale)
    pub fn terminal_weight_scale(&self) -> f64 {
        self.weight_scale(self.num_intervals() - 1)
    }

    /// Index of the node at time `t`, if `t` falls on the grid
    pub fn node_at(&self, t: f64) -> Option<usize> {
        const TOLERANCE: f64 = 1e-9;
        self.node_times
            .iter()
            .position(|&node| (node - t).abs() <= TOLERANCE)
    }
}

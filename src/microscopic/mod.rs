//! Microscopic Engine
//!
//! Agent-based social-force evacuation. Each agent steers toward its chosen
//! exit under panic-scaled attraction while repelled by neighbours, walls and
//! hazards; crowding and hazards cap its speed.

pub mod engine;
pub mod evacuation_test;
pub mod forces;
pub mod grid;
pub mod pool;

use serde::{Deserialize, Serialize};

use crate::core::config::{non_negative, positive};
use crate::core::{
    ConfigError, Diagnostics, NoopObserver, ParameterPreset, ProgressObserver, Result, RunBudget,
    RunOutcome, Scenario,
};

pub use crate::core::RoutingBias;

pub use engine::{MicroState, MicroscopicEngine, StepReport};
pub use pool::{AgentPool, AgentStatus};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MicroParams {
    /// Seconds per step.
    pub dt: f32,
    /// Unpanicked walking speed (m/s).
    pub desired_speed: f32,
    pub relaxation_time: f32,
    pub agent_strength: f32,
    pub agent_range: f32,
    pub neighbor_radius: f32,
    pub wall_strength: f32,
    pub wall_range: f32,
    pub wall_cutoff: f32,
    pub capture_radius: f32,
    /// Radius of the local density estimate.
    pub density_radius: f32,
    pub density_threshold: f32,
    pub jam_density: f32,
    pub min_crowd_factor: f32,
    /// Metres of path length an agent will trade to use its preferred exit.
    pub familiarity_bonus: f32,
    /// Metres of path length a guidance instruction is worth.
    pub guidance_bias: f32,
    /// Per-step chance (times compliance) that an agent takes up guidance.
    pub guidance_uptake: f32,
    /// Standard deviation of cluster scatter (m).
    pub cluster_spread: f32,
    /// Default growth for fires without their own `spread_rate`.
    pub fire_spread_rate: f32,
    /// Cell size of the navigation grid (m).
    pub nav_cell: f32,
    /// End the run as soon as nobody is left.
    pub stop_when_clear: bool,
}

impl Default for MicroParams {
    fn default() -> Self {
        Self::from_preset(&ParameterPreset::default())
    }
}

impl MicroParams {
    pub fn from_preset(preset: &ParameterPreset) -> Self {
        Self {
            dt: 0.1,
            desired_speed: 1.4,
            relaxation_time: 0.5,
            agent_strength: 2.0,
            agent_range: 0.8,
            neighbor_radius: 2.0,
            wall_strength: 3.0,
            wall_range: 0.2,
            wall_cutoff: 1.0,
            capture_radius: 1.0,
            density_radius: 1.0,
            density_threshold: preset.density_threshold,
            jam_density: 5.4,
            min_crowd_factor: 0.2,
            familiarity_bonus: 3.0,
            guidance_bias: 6.0,
            guidance_uptake: 0.15,
            cluster_spread: 1.0,
            fire_spread_rate: preset.fire_spread_rate,
            nav_cell: 0.25,
            stop_when_clear: false,
        }
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        positive("dt", self.dt)?;
        positive("desired_speed", self.desired_speed)?;
        positive("relaxation_time", self.relaxation_time)?;
        positive("neighbor_radius", self.neighbor_radius)?;
        positive("agent_range", self.agent_range)?;
        positive("wall_range", self.wall_range)?;
        positive("capture_radius", self.capture_radius)?;
        positive("density_radius", self.density_radius)?;
        positive("nav_cell", self.nav_cell)?;
        non_negative("agent_strength", self.agent_strength)?;
        non_negative("wall_strength", self.wall_strength)?;
        non_negative("wall_cutoff", self.wall_cutoff)?;
        non_negative("density_threshold", self.density_threshold)?;
        non_negative("familiarity_bonus", self.familiarity_bonus)?;
        non_negative("guidance_bias", self.guidance_bias)?;
        non_negative("cluster_spread", self.cluster_spread)?;
        non_negative("fire_spread_rate", self.fire_spread_rate)?;
        if !(0.0..=1.0).contains(&self.guidance_uptake) {
            return Err(ConfigError::invalid("guidance_uptake", "must lie in [0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.min_crowd_factor) {
            return Err(ConfigError::invalid("min_crowd_factor", "must lie in [0, 1]"));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct MicroscopicResult {
    /// `[t][agent]`, `null` once evacuated.
    pub positions: Vec<Vec<Option<[f32; 2]>>>,
    pub velocities: Vec<Vec<Option<[f32; 2]>>>,
    /// Cumulative evacuations after each step.
    pub evacuated_count: Vec<usize>,
    pub exit_usage: Vec<usize>,
    /// Step (1-based) at which each agent left, if it did.
    pub evacuation_steps: Vec<Option<usize>>,
    pub num_agents: usize,
    pub time_steps: usize,
    pub dt: f32,
    pub panic_factor: f32,
    pub outcome: RunOutcome,
    pub diagnostics: Diagnostics,
}

impl MicroscopicResult {
    pub fn evacuated(&self) -> usize {
        self.evacuated_count.last().copied().unwrap_or(0)
    }

    /// Index of the first frame with everybody out.
    pub fn completion_step(&self) -> Option<usize> {
        self.evacuated_count.iter().position(|&c| c == self.num_agents)
    }
}

pub fn run(scenario: &Scenario, params: &MicroParams) -> Result<MicroscopicResult> {
    run_with(scenario, params, &RunBudget::unlimited(), &mut NoopObserver)
}

pub fn run_with(
    scenario: &Scenario,
    params: &MicroParams,
    budget: &RunBudget,
    observer: &mut dyn ProgressObserver,
) -> Result<MicroscopicResult> {
    let engine = MicroscopicEngine::new(scenario, params)?;
    Ok(engine.run(budget, observer))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preset_feeds_density_threshold_and_fire_growth() {
        let p = MicroParams::from_preset(&ParameterPreset::named("fire_scenario").unwrap());
        assert_eq!(p.density_threshold, 3.0);
        assert_eq!(p.fire_spread_rate, 0.05);
        p.validate().unwrap();
    }

    #[test]
    fn params_round_trip_with_partial_json() {
        let p: MicroParams = serde_json::from_str(r#"{"dt": 0.05}"#).unwrap();
        assert_eq!(p.dt, 0.05);
        assert_eq!(p.desired_speed, 1.4);
    }
}

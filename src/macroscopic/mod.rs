//! Macroscopic Engine
//!
//! Continuum crowd model: density obeys a continuity equation with a
//! fundamental-diagram speed along the exit potential, coupled to a fire
//! field that grows on the same grid.

pub mod conservation_test;
pub mod fire;
pub mod solver;

use serde::{Deserialize, Serialize};

use crate::core::config::{non_negative, positive};
use crate::core::{
    ConfigError, NoopObserver, ParameterPreset, ProgressObserver, Result, RunBudget, Scenario,
};
use crate::field::{run_model, FieldResult};

pub use fire::FireField;
pub use solver::{MacroState, MacroscopicEngine};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MacroParams {
    pub dt: f32,
    /// Cells along the longer side of the domain.
    pub grid_resolution: usize,
    pub free_speed: f32,
    pub jam_density: f32,
    /// Floor on the Greenshields factor so an over-packed start still drains.
    pub min_speed_fraction: f32,
    pub diffusion_coefficient: f32,
    pub evacuation_coefficient: f32,
    /// Casualty rate per unit of fire intensity (1/s).
    pub fire_coupling: f32,
    /// How hard the walking direction turns away from the fire gradient.
    pub fire_deflection: f32,
    pub fire_spread_rate: f32,
    pub exit_radius: f32,
    pub cluster_spread: f32,
    pub max_courant: f32,
    pub max_substeps: usize,
    pub stop_when_clear: bool,
}

impl Default for MacroParams {
    fn default() -> Self {
        Self::from_preset(&ParameterPreset::default())
    }
}

impl MacroParams {
    pub fn from_preset(preset: &ParameterPreset) -> Self {
        Self {
            dt: 0.1,
            grid_resolution: preset.grid_resolution,
            free_speed: 1.3,
            jam_density: 5.4,
            min_speed_fraction: 0.05,
            diffusion_coefficient: preset.diffusion_coefficient,
            evacuation_coefficient: preset.evacuation_coefficient,
            fire_coupling: 0.2,
            fire_deflection: 0.5,
            fire_spread_rate: preset.fire_spread_rate,
            exit_radius: 1.0,
            cluster_spread: 1.0,
            max_courant: 0.9,
            max_substeps: 16,
            stop_when_clear: false,
        }
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        positive("dt", self.dt)?;
        positive("free_speed", self.free_speed)?;
        positive("jam_density", self.jam_density)?;
        positive("exit_radius", self.exit_radius)?;
        non_negative("diffusion_coefficient", self.diffusion_coefficient)?;
        non_negative("evacuation_coefficient", self.evacuation_coefficient)?;
        non_negative("fire_coupling", self.fire_coupling)?;
        non_negative("fire_deflection", self.fire_deflection)?;
        non_negative("fire_spread_rate", self.fire_spread_rate)?;
        non_negative("cluster_spread", self.cluster_spread)?;
        if self.grid_resolution < 2 {
            return Err(ConfigError::invalid("grid_resolution", "must be at least 2 cells"));
        }
        if !(self.max_courant > 0.0 && self.max_courant <= 1.0) {
            return Err(ConfigError::invalid("max_courant", "must lie in (0, 1]"));
        }
        if self.max_substeps == 0 {
            return Err(ConfigError::invalid("max_substeps", "must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.min_speed_fraction) {
            return Err(ConfigError::invalid("min_speed_fraction", "must lie in [0, 1]"));
        }
        Ok(())
    }
}

pub fn run(scenario: &Scenario, params: &MacroParams) -> Result<FieldResult> {
    run_with(scenario, params, &RunBudget::unlimited(), &mut NoopObserver)
}

pub fn run_with(
    scenario: &Scenario,
    params: &MacroParams,
    budget: &RunBudget,
    observer: &mut dyn ProgressObserver,
) -> Result<FieldResult> {
    let engine = MacroscopicEngine::new(scenario, params)?;
    Ok(run_model(&engine, budget, observer))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fire_preset_feeds_resolution_and_spread() {
        let p = MacroParams::from_preset(&ParameterPreset::named("fire_scenario").unwrap());
        assert_eq!(p.grid_resolution, 120);
        assert_eq!(p.fire_spread_rate, 0.05);
        assert_eq!(p.evacuation_coefficient, 1.5);
        p.validate().unwrap();
    }

    #[test]
    fn zero_resolution_is_a_config_error() {
        let p = MacroParams { grid_resolution: 0, ..MacroParams::default() };
        assert!(matches!(p.validate(), Err(ConfigError::InvalidParameter { .. })));
    }
}

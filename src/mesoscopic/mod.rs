//! Mesoscopic Engine
//!
//! Kinetic crowd model on a grid. Population in each cell is split over
//! eight walking directions and a resting share; collisions relax it toward
//! a density-dependent equilibrium aimed down the exit potential, streaming
//! carries it between cells, and sinks remove it at exits and in hazards.

pub mod engine;
pub mod lattice;

use serde::{Deserialize, Serialize};

use crate::core::config::{non_negative, positive};
use crate::core::{
    ConfigError, NoopObserver, ParameterPreset, ProgressObserver, Result, RunBudget, Scenario,
};
use crate::field::{run_model, FieldResult};

pub use engine::{MesoState, MesoscopicEngine};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MesoParams {
    pub dt: f32,
    /// Cells along the longer side of the domain.
    pub grid_size: usize,
    /// Walking speed in free flow (m/s).
    pub free_speed: f32,
    pub density_threshold: f32,
    pub jam_density: f32,
    /// Share of free speed kept at jam density.
    pub min_speed_fraction: f32,
    /// m²/s; clamped per sub-step for stability.
    pub diffusion_coefficient: f32,
    /// Fraction of exit-cell mass leaving per second.
    pub evacuation_coefficient: f32,
    pub fire_spread_rate: f32,
    /// Weight of the hazard-gradient term in the equilibrium directions.
    pub hazard_avoidance: f32,
    /// Radius of the sink disc around each exit (m).
    pub exit_radius: f32,
    pub cluster_spread: f32,
    pub max_substeps: usize,
    pub stop_when_clear: bool,
}

impl Default for MesoParams {
    fn default() -> Self {
        Self::from_preset(&ParameterPreset::default())
    }
}

impl MesoParams {
    pub fn from_preset(preset: &ParameterPreset) -> Self {
        Self {
            dt: 0.1,
            grid_size: preset.grid_size,
            free_speed: 1.3,
            density_threshold: preset.density_threshold,
            jam_density: 5.4,
            min_speed_fraction: 0.2,
            diffusion_coefficient: preset.diffusion_coefficient,
            evacuation_coefficient: preset.evacuation_coefficient,
            fire_spread_rate: preset.fire_spread_rate,
            hazard_avoidance: 2.0,
            exit_radius: 1.0,
            cluster_spread: 1.0,
            max_substeps: 8,
            stop_when_clear: false,
        }
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        positive("dt", self.dt)?;
        positive("free_speed", self.free_speed)?;
        positive("exit_radius", self.exit_radius)?;
        non_negative("density_threshold", self.density_threshold)?;
        non_negative("diffusion_coefficient", self.diffusion_coefficient)?;
        non_negative("evacuation_coefficient", self.evacuation_coefficient)?;
        non_negative("fire_spread_rate", self.fire_spread_rate)?;
        non_negative("hazard_avoidance", self.hazard_avoidance)?;
        non_negative("cluster_spread", self.cluster_spread)?;
        if self.grid_size < 2 {
            return Err(ConfigError::invalid("grid_size", "must be at least 2 cells"));
        }
        if self.max_substeps == 0 {
            return Err(ConfigError::invalid("max_substeps", "must be at least 1"));
        }
        if self.jam_density <= self.density_threshold {
            return Err(ConfigError::invalid(
                "jam_density",
                "must exceed density_threshold",
            ));
        }
        if !(0.0..=1.0).contains(&self.min_speed_fraction) {
            return Err(ConfigError::invalid("min_speed_fraction", "must lie in [0, 1]"));
        }
        Ok(())
    }
}

pub fn run(scenario: &Scenario, params: &MesoParams) -> Result<FieldResult> {
    run_with(scenario, params, &RunBudget::unlimited(), &mut NoopObserver)
}

pub fn run_with(
    scenario: &Scenario,
    params: &MesoParams,
    budget: &RunBudget,
    observer: &mut dyn ProgressObserver,
) -> Result<FieldResult> {
    let engine = MesoscopicEngine::new(scenario, params)?;
    Ok(run_model(&engine, budget, observer))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preset_drives_grid_and_coefficients() {
        let p = MesoParams::from_preset(&ParameterPreset::named("high_detail").unwrap());
        assert_eq!(p.grid_size, 80);
        assert_eq!(p.evacuation_coefficient, 1.2);
        p.validate().unwrap();
    }

    #[test]
    fn jam_below_threshold_is_rejected() {
        let p = MesoParams {
            density_threshold: 6.0,
            ..MesoParams::default()
        };
        assert!(p.validate().is_err());
    }
}

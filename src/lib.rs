//! EvacForge Core - Multi-Scale Evacuation Simulation
//!
//! Simulates building evacuations under fire, flood, earthquake and
//! structural hazards at three scales:
//!
//! * [`microscopic`]: social-force agents with panic, crowding and exit
//!   familiarity;
//! * [`mesoscopic`]: kinetic lattice populations relaxing toward a
//!   density-dependent flow;
//! * [`macroscopic`]: a continuum density PDE coupled to a growing fire.
//!
//! [`training`] wraps any of them as a reinforcement-learning environment and
//! learns exit-routing guidance with a Gini fairness penalty.

pub mod core;
pub mod field;
pub mod hazard;
pub mod macroscopic;
pub mod mesoscopic;
pub mod microscopic;
pub mod training;

use serde::Serialize;

pub use crate::core::{
    Diagnostics, EngineKind, EvacError, NoopObserver, ParameterPreset, PresetOverrides,
    ProgressObserver, Result, RoutingBias, RunBudget, RunOutcome, Scenario,
};
pub use crate::field::FieldResult;
pub use crate::hazard::{Hazard, HazardKind};
pub use crate::microscopic::MicroscopicResult;
pub use crate::training::{TrainingConfig, TrainingReport};

/// Output of [`simulate`]: agent trajectories or density fields.
#[derive(Clone, Debug, Serialize)]
#[serde(untagged)]
pub enum SimulationOutput {
    Agents(MicroscopicResult),
    Fields(FieldResult),
}

impl SimulationOutput {
    pub fn outcome(&self) -> RunOutcome {
        match self {
            SimulationOutput::Agents(r) => r.outcome,
            SimulationOutput::Fields(r) => r.outcome,
        }
    }

    /// People evacuated by the end of the run.
    pub fn evacuated(&self) -> f32 {
        match self {
            SimulationOutput::Agents(r) => r.evacuated() as f32,
            SimulationOutput::Fields(r) => r.evacuated(),
        }
    }
}

/// Run `scenario` on the chosen engine with `preset`'s options and crowd.
pub fn simulate(
    scenario: &Scenario,
    engine: EngineKind,
    preset: &ParameterPreset,
    budget: &RunBudget,
    observer: &mut dyn ProgressObserver,
) -> Result<SimulationOutput> {
    preset.validate()?;
    let scenario = &scenario.with_preset(preset);
    Ok(match engine {
        EngineKind::Microscopic => SimulationOutput::Agents(microscopic::run_with(
            scenario,
            &microscopic::MicroParams::from_preset(preset),
            budget,
            observer,
        )?),
        EngineKind::Mesoscopic => SimulationOutput::Fields(mesoscopic::run_with(
            scenario,
            &mesoscopic::MesoParams::from_preset(preset),
            budget,
            observer,
        )?),
        EngineKind::Macroscopic => SimulationOutput::Fields(macroscopic::run_with(
            scenario,
            &macroscopic::MacroParams::from_preset(preset),
            budget,
            observer,
        )?),
    })
}

/// Setup logging
pub fn setup_logging(level: Option<String>) {
    let filter = level.unwrap_or_else(|| "info".to_string());
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_engine_runs_a_sample_building() {
        setup_logging(Some("warn".into()));
        setup_logging(None);
        let mut scenario = crate::core::samples::by_name("office").unwrap();
        scenario.time_steps = 10;
        let preset = ParameterPreset::default().with_overrides(&PresetOverrides {
            grid_size: Some(20),
            grid_resolution: Some(30),
            ..PresetOverrides::default()
        });
        for engine in [EngineKind::Microscopic, EngineKind::Mesoscopic, EngineKind::Macroscopic] {
            let out = simulate(&scenario, engine, &preset, &RunBudget::unlimited(), &mut NoopObserver)
                .unwrap();
            assert_eq!(out.outcome(), RunOutcome::Completed);
            assert!(out.evacuated() >= 0.0);
            let json = serde_json::to_value(&out).unwrap();
            assert!(json["evacuated_count"].as_array().map_or(false, |a| a.len() == 10));
        }
    }

    #[test]
    fn preset_decides_the_crowd_size() {
        let mut scenario = crate::core::samples::by_name("office").unwrap();
        scenario.time_steps = 2;
        let crowded = ParameterPreset::named("crowded").unwrap().with_overrides(&PresetOverrides {
            grid_resolution: Some(30),
            ..PresetOverrides::default()
        });
        let budget = RunBudget::unlimited();

        match simulate(&scenario, EngineKind::Microscopic, &crowded, &budget, &mut NoopObserver).unwrap() {
            SimulationOutput::Agents(r) => {
                assert_eq!(r.num_agents, 300);
                assert_eq!(r.positions[0].len(), 300);
                assert_eq!(r.panic_factor, 1.2);
            }
            SimulationOutput::Fields(_) => panic!("micro engine returned fields"),
        }
        match simulate(&scenario, EngineKind::Macroscopic, &crowded, &budget, &mut NoopObserver).unwrap() {
            SimulationOutput::Fields(r) => assert!((r.initial_population - 300.0).abs() < 0.5),
            SimulationOutput::Agents(_) => panic!("macro engine returned agents"),
        }

        let standard = ParameterPreset::named("standard").unwrap();
        match simulate(&scenario, EngineKind::Microscopic, &standard, &budget, &mut NoopObserver).unwrap() {
            SimulationOutput::Agents(r) => assert_eq!(r.num_agents, 100),
            SimulationOutput::Fields(_) => panic!("micro engine returned fields"),
        }
    }
}

//! Routing Policy Training
//!
//! Wraps an engine as an [`Environment`] and learns, episode by episode, which
//! exit to promote so that people get out quickly without overloading one
//! exit. The policy is a small candle actor-critic trained on the CPU (or a
//! CUDA device when asked); the physics always stays on the CPU.

pub mod env;
pub mod fairness;
pub mod policy;
pub mod trainer;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::core::config::{non_negative, positive};
use crate::core::{
    ConfigError, EngineKind, ParameterPreset, ProgressObserver, Result, RunOutcome, Scenario,
};
use crate::macroscopic::{MacroParams, MacroscopicEngine};
use crate::mesoscopic::{MesoParams, MesoscopicEngine};
use crate::microscopic::{MicroParams, MicroscopicEngine};

pub use env::{CrowdEnv, Environment, FieldEnv, Observation, StepInfo, StepOutcome};
pub use fairness::{gini, FairnessCharge};
pub use policy::ActorCritic;
pub use trainer::{evaluate, Trainer};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub episodes: usize,
    pub learning_rate: f64,
    pub gamma: f32,
    pub hidden_size: usize,
    pub entropy_coef: f32,
    pub value_coef: f32,
    pub throughput_weight: f32,
    pub fairness_weight: f32,
    /// Penalty per person (as a share of the population) lost to hazards.
    pub hazard_weight: f32,
    pub use_fairness: bool,
    pub fairness_charge: FairnessCharge,
    /// Upper bound on steps per episode; the scenario's own step count
    /// applies when unset or smaller.
    pub step_budget: Option<usize>,
    /// Potential offset in metres given to a promoted exit by the grid
    /// environments.
    pub guidance_weight: f32,
    pub use_gpu: bool,
    pub seed: u64,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            episodes: 100,
            learning_rate: 0.01,
            gamma: 0.995,
            hidden_size: 64,
            entropy_coef: 0.01,
            value_coef: 0.5,
            throughput_weight: 1.0,
            fairness_weight: 1.0,
            hazard_weight: 1.0,
            use_fairness: true,
            fairness_charge: FairnessCharge::default(),
            step_budget: None,
            guidance_weight: 6.0,
            use_gpu: false,
            seed: 0,
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(ConfigError::invalid("learning_rate", "must be positive"));
        }
        if !(self.gamma > 0.0 && self.gamma <= 1.0) {
            return Err(ConfigError::invalid("gamma", "must lie in (0, 1]"));
        }
        if self.hidden_size == 0 {
            return Err(ConfigError::invalid("hidden_size", "must be at least 1"));
        }
        if self.step_budget == Some(0) {
            return Err(ConfigError::invalid("step_budget", "must be at least 1 step"));
        }
        positive("throughput_weight", self.throughput_weight)?;
        non_negative("entropy_coef", self.entropy_coef)?;
        non_negative("value_coef", self.value_coef)?;
        non_negative("fairness_weight", self.fairness_weight)?;
        non_negative("hazard_weight", self.hazard_weight)?;
        non_negative("guidance_weight", self.guidance_weight)?;
        Ok(())
    }
}

/// Per-episode learning curves.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TrainingReport {
    pub rewards: Vec<f32>,
    /// Episode length in simulated seconds.
    pub evacuation_times: Vec<f32>,
    /// Gini of per-exit evacuations at the end of each episode.
    pub gini_history: Vec<f32>,
    /// `null` where the update was skipped.
    pub losses: Vec<Option<f32>>,
    /// Share of the population that got out.
    pub evacuated: Vec<f32>,
    /// Episodes whose reward or loss was not finite.
    pub anomalies: Vec<usize>,
    pub outcome: RunOutcome,
}

impl TrainingReport {
    pub fn with_capacity(episodes: usize) -> Self {
        Self {
            rewards: Vec::with_capacity(episodes),
            evacuation_times: Vec::with_capacity(episodes),
            gini_history: Vec::with_capacity(episodes),
            losses: Vec::with_capacity(episodes),
            evacuated: Vec::with_capacity(episodes),
            anomalies: Vec::new(),
            outcome: RunOutcome::Completed,
        }
    }

    pub fn episodes(&self) -> usize {
        self.rewards.len()
    }

    /// Mean Gini over the last `window` episodes.
    pub fn recent_gini(&self, window: usize) -> f32 {
        let tail = &self.gini_history[self.gini_history.len().saturating_sub(window)..];
        if tail.is_empty() {
            0.0
        } else {
            tail.iter().sum::<f32>() / tail.len() as f32
        }
    }
}

/// Greedy-policy metrics over several episodes.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct EvaluationReport {
    pub avg_evacuation_time: f32,
    pub avg_success_rate: f32,
    pub avg_gini: f32,
    pub evacuation_times: Vec<f32>,
    pub success_rates: Vec<f32>,
    pub gini_values: Vec<f32>,
}

impl EvaluationReport {
    fn summarise(&mut self) {
        let mean = |v: &[f32]| if v.is_empty() { 0.0 } else { v.iter().sum::<f32>() / v.len() as f32 };
        self.avg_evacuation_time = mean(&self.evacuation_times);
        self.avg_success_rate = mean(&self.success_rates);
        self.avg_gini = mean(&self.gini_values);
    }
}

/// Trained policy together with its learning curves.
pub struct TrainingRun {
    pub report: TrainingReport,
    pub policy: ActorCritic,
}

/// Train a fresh policy on `env`.
pub fn train<E: Environment + ?Sized>(
    env: &mut E,
    config: &TrainingConfig,
    observer: &mut dyn ProgressObserver,
) -> Result<TrainingRun> {
    let mut trainer = Trainer::for_env(config, env)?;
    let report = trainer.train(env, observer)?;
    Ok(TrainingRun {
        report,
        policy: trainer.into_policy(),
    })
}

/// Build the environment for `engine` on `scenario`, populated and
/// configured by `preset`, and train on it.
pub fn train_scenario(
    scenario: &Scenario,
    engine: EngineKind,
    preset: &ParameterPreset,
    config: &TrainingConfig,
    observer: &mut dyn ProgressObserver,
) -> Result<TrainingRun> {
    config.validate()?;
    preset.validate()?;
    let scenario = &scenario.with_preset(preset);
    info!(
        "[Trainer] Training on {:?} engine, preset `{}`",
        engine, preset.name
    );
    match engine {
        EngineKind::Microscopic => {
            let model = MicroscopicEngine::new(scenario, &MicroParams::from_preset(preset))?;
            let mut env = CrowdEnv::new(model, scenario.time_steps, config);
            train(&mut env, config, observer)
        }
        EngineKind::Mesoscopic => {
            let model = MesoscopicEngine::new(scenario, &MesoParams::from_preset(preset))?;
            let mut env = FieldEnv::new(model, config);
            train(&mut env, config, observer)
        }
        EngineKind::Macroscopic => {
            let model = MacroscopicEngine::new(scenario, &MacroParams::from_preset(preset))?;
            let mut env = FieldEnv::new(model, config);
            train(&mut env, config, observer)
        }
    }
}

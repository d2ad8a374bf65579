//! Training environments
//!
//! An [`Environment`] turns one engine into a step-able decision process.
//! Each step the controller picks an exit to promote (or none); the engine
//! advances one step under that routing bias and the step is scored for
//! throughput, hazard losses and exit-usage fairness.

use serde::Serialize;

use super::fairness::{gini, FairnessTracker};
use super::TrainingConfig;
use crate::core::RoutingBias;
use crate::field::FieldModel;
use crate::hazard::Point;
use crate::microscopic::{MicroState, MicroscopicEngine};

/// Coarse occupancy grid is `OBS_BINS × OBS_BINS`.
pub const OBS_BINS: usize = 8;

pub type Observation = Vec<f32>;

/// Features for `exits` exits: occupancy grid, cumulative exit shares,
/// current assignment shares and elapsed-time fraction.
pub fn observation_size(exits: usize) -> usize {
    OBS_BINS * OBS_BINS + 2 * exits + 1
}

/// Discrete actions for `exits` exits: one per exit plus "no guidance".
pub fn action_count(exits: usize) -> usize {
    exits + 1
}

/// Routing bias for `action`; anything past the last exit is neutral.
pub fn action_bias(action: usize, exits: usize, weight: f32) -> RoutingBias {
    if action < exits {
        RoutingBias::boost(exits, action, weight)
    } else {
        RoutingBias::neutral(exits)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct StepInfo {
    pub step: usize,
    pub newly_evacuated: f32,
    pub evacuated: f32,
    pub population: f32,
    pub hazard_removed: f32,
    pub exit_usage: Vec<f32>,
    pub gini: f32,
    /// Episode ended on the step budget with people still inside.
    pub truncated: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StepOutcome {
    pub observation: Observation,
    pub reward: f32,
    pub done: bool,
    pub info: StepInfo,
}

pub trait Environment {
    fn observation_size(&self) -> usize;
    fn action_count(&self) -> usize;
    /// Simulated seconds per step.
    fn dt(&self) -> f32;

    fn reset(&mut self) -> Observation;
    fn step(&mut self, action: usize) -> StepOutcome;
}

/// Reward weights and the running fairness term of one episode.
#[derive(Clone, Debug)]
pub struct RewardShaper {
    throughput_weight: f32,
    fairness_weight: f32,
    hazard_weight: f32,
    use_fairness: bool,
    fairness: FairnessTracker,
}

impl RewardShaper {
    pub fn new(config: &TrainingConfig) -> Self {
        Self {
            throughput_weight: config.throughput_weight,
            fairness_weight: config.fairness_weight,
            hazard_weight: config.hazard_weight,
            use_fairness: config.use_fairness,
            fairness: FairnessTracker::new(config.fairness_charge),
        }
    }

    pub fn reset(&mut self) {
        self.fairness.reset();
    }

    /// Score one step. `occupied` says whether anyone was still inside when
    /// the step began; the fairness term is only charged then.
    pub fn score(&mut self, info: &StepInfo, occupied: bool) -> f32 {
        let population = info.population.max(f32::EPSILON);
        let mut reward = self.throughput_weight * info.newly_evacuated / population
            - self.hazard_weight * info.hazard_removed / population;
        if self.use_fairness && occupied {
            reward -= self.fairness_weight * self.fairness.penalty(&info.exit_usage);
        }
        reward
    }
}

/// Flattens engine state into the fixed observation layout.
#[derive(Clone, Debug)]
struct ObservationLayout {
    domain: [f32; 2],
    exits: usize,
}

impl ObservationLayout {
    fn build(
        &self,
        occupants: impl Iterator<Item = (Point, f32)>,
        population: f32,
        usage: &[f32],
        assignment: &[f32],
        time_fraction: f32,
    ) -> Observation {
        let mut obs = vec![0.0; observation_size(self.exits)];
        let scale = 1.0 / population.max(f32::EPSILON);
        for (p, mass) in occupants {
            let bx = ((p[0] / self.domain[0] * OBS_BINS as f32) as usize).min(OBS_BINS - 1);
            let by = ((p[1] / self.domain[1] * OBS_BINS as f32) as usize).min(OBS_BINS - 1);
            obs[by * OBS_BINS + bx] += mass * scale;
        }
        let base = OBS_BINS * OBS_BINS;
        for e in 0..self.exits {
            obs[base + e] = usage.get(e).copied().unwrap_or(0.0) * scale;
            obs[base + self.exits + e] = assignment.get(e).copied().unwrap_or(0.0);
        }
        obs[base + 2 * self.exits] = time_fraction.clamp(0.0, 1.0);
        obs
    }
}

fn episode_limit(requested: usize, budget: Option<usize>) -> usize {
    budget.map_or(requested, |b| b.min(requested)).max(1)
}

/// Agent-based environment over the microscopic engine. Promoting an exit
/// broadcasts guidance that compliant agents take up.
pub struct CrowdEnv {
    engine: MicroscopicEngine,
    state: MicroState,
    shaper: RewardShaper,
    layout: ObservationLayout,
    guidance_weight: f32,
    max_steps: usize,
}

impl CrowdEnv {
    pub fn new(engine: MicroscopicEngine, time_steps: usize, config: &TrainingConfig) -> Self {
        let layout = ObservationLayout {
            domain: engine.domain(),
            exits: engine.exit_count(),
        };
        Self {
            state: engine.init_state(),
            shaper: RewardShaper::new(config),
            layout,
            guidance_weight: config.guidance_weight,
            max_steps: episode_limit(time_steps, config.step_budget),
            engine,
        }
    }

    pub fn engine(&self) -> &MicroscopicEngine {
        &self.engine
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    fn observe(&self) -> Observation {
        let exits = self.engine.exit_count();
        let pool = &self.state.pool;
        let active = pool.active_count();
        let goals = self.state.goal_counts(exits);
        let assignment: Vec<f32> = goals
            .iter()
            .map(|&g| if active > 0 { g as f32 / active as f32 } else { 0.0 })
            .collect();
        let usage: Vec<f32> = self.state.exit_usage().iter().map(|&u| u as f32).collect();
        let occupants = (0..pool.n_agents)
            .filter(|&i| pool.is_active(i))
            .map(|i| (pool.position(i), 1.0));
        self.layout.build(
            occupants,
            pool.n_agents as f32,
            &usage,
            &assignment,
            self.state.step_index() as f32 / self.max_steps as f32,
        )
    }
}

impl Environment for CrowdEnv {
    fn observation_size(&self) -> usize {
        observation_size(self.engine.exit_count())
    }

    fn action_count(&self) -> usize {
        action_count(self.engine.exit_count())
    }

    fn dt(&self) -> f32 {
        self.engine.params().dt
    }

    fn reset(&mut self) -> Observation {
        self.state = self.engine.init_state();
        self.shaper.reset();
        self.observe()
    }

    fn step(&mut self, action: usize) -> StepOutcome {
        let exits = self.engine.exit_count();
        let occupied = !self.state.is_clear();
        let bias = action_bias(action, exits, self.guidance_weight);
        let report = self.engine.step(&mut self.state, &bias);

        let exit_usage: Vec<f32> = self.state.exit_usage().iter().map(|&u| u as f32).collect();
        let clear = self.state.is_clear();
        let out_of_steps = self.state.step_index() >= self.max_steps;
        let info = StepInfo {
            step: self.state.step_index(),
            newly_evacuated: report.newly_evacuated as f32,
            evacuated: self.state.evacuated() as f32,
            population: self.state.pool.n_agents as f32,
            hazard_removed: 0.0,
            gini: gini(&exit_usage),
            exit_usage,
            truncated: out_of_steps && !clear,
        };
        let reward = self.shaper.score(&info, occupied);
        StepOutcome {
            observation: self.observe(),
            reward,
            done: clear || out_of_steps,
            info,
        }
    }
}

/// Density-field environment over a mesoscopic or macroscopic engine.
/// Promoting an exit lowers its potential by the guidance weight in metres.
pub struct FieldEnv<M: FieldModel> {
    model: M,
    state: M::State,
    shaper: RewardShaper,
    layout: ObservationLayout,
    guidance_weight: f32,
    max_steps: usize,
}

impl<M: FieldModel> FieldEnv<M> {
    pub fn new(model: M, config: &TrainingConfig) -> Self {
        let spec = model.layout().spec;
        let layout = ObservationLayout {
            domain: [
                spec.width as f32 * spec.cell_size,
                spec.height as f32 * spec.cell_size,
            ],
            exits: model.layout().exit_count(),
        };
        Self {
            state: model.init_state(),
            shaper: RewardShaper::new(config),
            layout,
            guidance_weight: config.guidance_weight,
            max_steps: episode_limit(model.time_steps(), config.step_budget),
            model,
        }
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn state(&self) -> &M::State {
        &self.state
    }

    pub fn max_steps(&self) -> usize {
        self.max_steps
    }

    fn observe(&self) -> Observation {
        let spec = self.model.layout().spec;
        let area = spec.cell_area();
        let ledger = self.model.ledger(&self.state);
        let density = self.model.density(&self.state);
        let occupants = density.iter().enumerate().filter(|(_, &rho)| rho > 0.0).map(|(cell, &rho)| {
            let (x, y) = spec.coords(cell);
            (spec.center(x, y), rho * area)
        });
        self.layout.build(
            occupants,
            ledger.population,
            &ledger.per_exit,
            &self.model.assignment_shares(&self.state),
            ledger.step as f32 / self.max_steps as f32,
        )
    }
}

impl<M: FieldModel> Environment for FieldEnv<M> {
    fn observation_size(&self) -> usize {
        observation_size(self.layout.exits)
    }

    fn action_count(&self) -> usize {
        action_count(self.layout.exits)
    }

    fn dt(&self) -> f32 {
        self.model.dt()
    }

    fn reset(&mut self) -> Observation {
        self.state = self.model.init_state();
        self.shaper.reset();
        self.observe()
    }

    fn step(&mut self, action: usize) -> StepOutcome {
        let occupied = !self.model.ledger(&self.state).is_clear();
        let bias = action_bias(action, self.layout.exits, self.guidance_weight);
        let report = self.model.step(&mut self.state, &bias);

        let ledger = self.model.ledger(&self.state);
        let clear = ledger.is_clear();
        let out_of_steps = ledger.step >= self.max_steps;
        let info = StepInfo {
            step: ledger.step,
            newly_evacuated: report.evacuated,
            evacuated: ledger.evacuated,
            population: ledger.population,
            hazard_removed: report.hazard_removed,
            exit_usage: ledger.per_exit.clone(),
            gini: gini(&ledger.per_exit),
            truncated: out_of_steps && !clear,
        };
        let reward = self.shaper.score(&info, occupied);
        StepOutcome {
            observation: self.observe(),
            reward,
            done: clear || out_of_steps,
            info,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Scenario;
    use crate::mesoscopic::{MesoParams, MesoscopicEngine};
    use crate::microscopic::MicroParams;

    fn two_exit_room(agents: usize, steps: usize) -> Scenario {
        Scenario::open_room(vec![[2.0, 10.0], [18.0, 10.0]], agents, steps)
            .with_cluster(8.0, 10.0, agents, Some(0))
    }

    fn crowd_env(config: &TrainingConfig, steps: usize) -> CrowdEnv {
        let scenario = two_exit_room(20, steps);
        let engine = MicroscopicEngine::new(&scenario, &MicroParams::default()).unwrap();
        CrowdEnv::new(engine, scenario.time_steps, config)
    }

    #[test]
    fn observation_layout_and_initial_occupancy() {
        let mut env = crowd_env(&TrainingConfig::default(), 50);
        assert_eq!(env.observation_size(), 64 + 4 + 1);
        assert_eq!(env.action_count(), 3);
        let obs = env.reset();
        assert_eq!(obs.len(), env.observation_size());
        let occupancy: f32 = obs[..OBS_BINS * OBS_BINS].iter().sum();
        assert!((occupancy - 1.0).abs() < 1e-5);
        assert_eq!(obs[obs.len() - 1], 0.0);
    }

    #[test]
    fn throughput_rewards_sum_to_evacuated_share() {
        let config = TrainingConfig { use_fairness: false, ..TrainingConfig::default() };
        let mut env = crowd_env(&config, 150);
        env.reset();
        let mut total = 0.0;
        let mut last = None;
        loop {
            let out = env.step(2);
            total += out.reward;
            if out.done {
                last = Some(out);
                break;
            }
        }
        let last = last.unwrap();
        assert!(last.info.evacuated > 0.0);
        assert!((total - last.info.evacuated / last.info.population).abs() < 1e-4);
    }

    #[test]
    fn incremental_fairness_charges_the_final_gini() {
        let config = TrainingConfig {
            fairness_weight: 2.0,
            step_budget: Some(120),
            ..TrainingConfig::default()
        };
        let mut env = crowd_env(&config, 300);
        env.reset();
        let mut total = 0.0;
        let last = loop {
            let out = env.step(0);
            total += out.reward;
            if out.done {
                break out;
            }
        };
        let throughput = last.info.evacuated / last.info.population;
        assert!(last.info.gini > 0.0);
        assert!((total - (throughput - 2.0 * last.info.gini)).abs() < 1e-4);
    }

    #[test]
    fn step_budget_truncates_the_episode() {
        let config = TrainingConfig { step_budget: Some(5), ..TrainingConfig::default() };
        let mut env = crowd_env(&config, 100);
        env.reset();
        let outcomes: Vec<StepOutcome> = (0..5).map(|_| env.step(2)).collect();
        assert!(outcomes[..4].iter().all(|o| !o.done));
        assert!(outcomes[4].done);
        assert!(outcomes[4].info.truncated);
    }

    #[test]
    fn field_env_guidance_moves_the_assignment() {
        let scenario = two_exit_room(30, 40);
        let engine = MesoscopicEngine::new(&scenario, &MesoParams::default()).unwrap();
        let config = TrainingConfig { guidance_weight: 10.0, ..TrainingConfig::default() };
        let mut env = FieldEnv::new(engine, &config);
        let obs = env.reset();
        let base = OBS_BINS * OBS_BINS;
        assert!((obs[..base].iter().sum::<f32>() - 1.0).abs() < 1e-3);

        let neutral = env.step(2);
        assert!(neutral.observation[base + 2] > 0.9);
        let boosted = env.step(1);
        assert!(boosted.observation[base + 3] > 0.9);
        assert!(boosted.reward.is_finite());
    }

    #[test]
    fn out_of_range_actions_are_neutral() {
        let bias = action_bias(7, 2, 5.0);
        assert_eq!(bias, RoutingBias::neutral(2));
        assert_eq!(action_bias(1, 2, 5.0).favoured(), Some(1));
    }
}

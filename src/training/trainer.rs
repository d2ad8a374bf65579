//! Episode loop and policy-gradient update
//!
//! Each episode is rolled out with the current stochastic policy, then the
//! policy takes one AdamW step on the REINFORCE loss with the critic as a
//! learned baseline plus an entropy bonus. An episode whose rewards or loss
//! are not finite is recorded as an anomaly and skips its update.

use candle_core::{Device, Tensor, D};
use candle_nn::{AdamW, Optimizer, ParamsAdamW};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, info, warn};

use super::env::{Environment, Observation, StepInfo};
use super::policy::ActorCritic;
use super::{EvaluationReport, TrainingConfig, TrainingReport};
use crate::core::{EpisodeProgress, ProgressObserver, Result, RunControl, RunOutcome};

/// Seed offset of the action-sampling stream, kept apart from weight init.
const ACTION_STREAM: u64 = 0xAC7_10E5;

/// One rolled-out episode.
pub struct Episode {
    pub observations: Vec<Observation>,
    pub actions: Vec<u32>,
    pub rewards: Vec<f32>,
    pub last: StepInfo,
}

impl Episode {
    pub fn steps(&self) -> usize {
        self.rewards.len()
    }

    pub fn total_reward(&self) -> f32 {
        self.rewards.iter().sum()
    }

    pub fn is_finite(&self) -> bool {
        self.rewards.iter().all(|r| r.is_finite())
    }
}

/// Discounted return from every step to the end of the episode.
pub fn discounted_returns(rewards: &[f32], gamma: f32) -> Vec<f32> {
    let mut returns = vec![0.0; rewards.len()];
    let mut running = 0.0;
    for (t, &r) in rewards.iter().enumerate().rev() {
        running = r + gamma * running;
        returns[t] = running;
    }
    returns
}

/// `G − V`, scaled to unit spread when the episode is long enough to have
/// one.
fn advantages(returns: &[f32], baseline: &[f32]) -> Vec<f32> {
    let mut adv: Vec<f32> = returns.iter().zip(baseline).map(|(g, v)| g - v).collect();
    if adv.len() < 2 {
        return adv;
    }
    let n = adv.len() as f32;
    let mean = adv.iter().sum::<f32>() / n;
    let std = (adv.iter().map(|a| (a - mean).powi(2)).sum::<f32>() / n).sqrt();
    if std > 1e-6 {
        adv.iter_mut().for_each(|a| *a /= std);
    }
    adv
}

pub struct Trainer {
    config: TrainingConfig,
    policy: ActorCritic,
    optimizer: AdamW,
    rng: StdRng,
}

impl Trainer {
    pub fn new(config: &TrainingConfig, observation_size: usize, action_count: usize) -> Result<Self> {
        config.validate()?;
        let device = if config.use_gpu {
            Device::cuda_if_available(0)?
        } else {
            Device::Cpu
        };
        let policy = ActorCritic::new(
            observation_size,
            action_count,
            config.hidden_size,
            config.seed,
            &device,
        )?;
        let optimizer = AdamW::new(
            policy.vars(),
            ParamsAdamW {
                lr: config.learning_rate,
                weight_decay: 0.0,
                ..ParamsAdamW::default()
            },
        )?;
        Ok(Self {
            config: config.clone(),
            policy,
            optimizer,
            rng: StdRng::seed_from_u64(config.seed ^ ACTION_STREAM),
        })
    }

    /// Trainer sized for `env`'s observation and action spaces.
    pub fn for_env<E: Environment + ?Sized>(config: &TrainingConfig, env: &E) -> Result<Self> {
        Self::new(config, env.observation_size(), env.action_count())
    }

    pub fn policy(&self) -> &ActorCritic {
        &self.policy
    }

    pub fn policy_mut(&mut self) -> &mut ActorCritic {
        &mut self.policy
    }

    pub fn into_policy(self) -> ActorCritic {
        self.policy
    }

    /// Play one episode with the sampling policy.
    pub fn rollout<E: Environment + ?Sized>(&mut self, env: &mut E) -> Result<Episode> {
        let mut observation = env.reset();
        let mut episode = Episode {
            observations: Vec::new(),
            actions: Vec::new(),
            rewards: Vec::new(),
            last: StepInfo::default(),
        };
        loop {
            let action = self.policy.act(&observation, &mut self.rng, false)?;
            let outcome = env.step(action);
            episode.observations.push(observation);
            episode.actions.push(action as u32);
            episode.rewards.push(outcome.reward);
            observation = outcome.observation;
            if outcome.done {
                episode.last = outcome.info;
                return Ok(episode);
            }
        }
    }

    /// One gradient step on `episode`. Returns the loss, or `None` when it
    /// was not finite and the step was skipped.
    pub fn update(&mut self, episode: &Episode) -> Result<Option<f32>> {
        let steps = episode.steps();
        if steps == 0 {
            return Ok(None);
        }
        let device = self.policy.device().clone();
        let returns = discounted_returns(&episode.rewards, self.config.gamma);

        let input = self.policy.batch(&episode.observations)?;
        let (logits, values) = self.policy.forward(&input)?;
        let baseline = values.to_vec1::<f32>()?;
        let adv = Tensor::from_vec(advantages(&returns, &baseline), steps, &device)?;
        let targets = Tensor::from_vec(returns, steps, &device)?;
        let actions = Tensor::from_vec(episode.actions.clone(), (steps, 1), &device)?;

        let log_probs = candle_nn::ops::log_softmax(&logits, D::Minus1)?;
        let chosen = log_probs.gather(&actions, 1)?.squeeze(1)?;
        let policy_loss = (chosen * adv)?.mean_all()?.neg()?;
        let value_loss = (values - targets)?.sqr()?.mean_all()?;
        let probs = candle_nn::ops::softmax(&logits, D::Minus1)?;
        let entropy = (probs * &log_probs)?.sum(1)?.mean_all()?.neg()?;

        let loss = (policy_loss + (value_loss * self.config.value_coef as f64)?)?;
        let loss = (loss - (entropy * self.config.entropy_coef as f64)?)?;
        let value = loss.to_scalar::<f32>()?;
        if !value.is_finite() {
            return Ok(None);
        }
        self.optimizer.backward_step(&loss)?;
        Ok(Some(value))
    }

    /// Train for `config.episodes` episodes. An observer abort stops after
    /// the current episode and returns what was recorded so far.
    pub fn train<E: Environment + ?Sized>(
        &mut self,
        env: &mut E,
        observer: &mut dyn ProgressObserver,
    ) -> Result<TrainingReport> {
        let total = self.config.episodes;
        let dt = env.dt();
        let mut report = TrainingReport::with_capacity(total);

        info!(
            "[Trainer] Starting {} episodes (fairness {}, lr {}, gamma {})",
            total,
            if self.config.use_fairness { "on" } else { "off" },
            self.config.learning_rate,
            self.config.gamma
        );

        for ep in 0..total {
            let episode = self.rollout(env)?;
            let loss = if episode.is_finite() {
                self.update(&episode)?
            } else {
                None
            };
            let diverged = loss.is_none();
            let reward = episode.total_reward();
            let evacuation_time = episode.steps() as f32 * dt;
            let population = episode.last.population.max(f32::EPSILON);
            let evacuated = episode.last.evacuated / population;

            report.rewards.push(reward);
            report.evacuation_times.push(evacuation_time);
            report.gini_history.push(episode.last.gini);
            report.losses.push(loss);
            report.evacuated.push(evacuated);
            if diverged {
                report.anomalies.push(ep);
                warn!("[Trainer] Episode {} diverged (reward {}), update skipped", ep + 1, reward);
            }

            if (ep + 1) % 10 == 0 || ep + 1 == total {
                info!(
                    "[Trainer] Episode {}/{}: reward {:.3}, time {:.1}s, gini {:.3}, evacuated {:.0}%",
                    ep + 1,
                    total,
                    reward,
                    evacuation_time,
                    episode.last.gini,
                    evacuated * 100.0
                );
            } else {
                debug!("[Trainer] Episode {}: reward {:.3}, loss {:?}", ep + 1, reward, loss);
            }

            let progress = EpisodeProgress {
                episode: ep + 1,
                total_episodes: total,
                reward,
                evacuation_time,
                gini: episode.last.gini,
                evacuated,
                diverged,
            };
            if observer.on_episode(&progress) == RunControl::Abort {
                info!("[Trainer] Cancelled after {} episodes", ep + 1);
                report.outcome = RunOutcome::Cancelled;
                break;
            }
        }
        Ok(report)
    }
}

/// Greedy rollouts of `policy` on `env`.
pub fn evaluate<E: Environment + ?Sized>(
    policy: &ActorCritic,
    env: &mut E,
    episodes: usize,
) -> Result<EvaluationReport> {
    let mut rng = StdRng::seed_from_u64(0);
    let dt = env.dt();
    let mut report = EvaluationReport::default();
    for _ in 0..episodes {
        let mut observation = env.reset();
        let mut steps = 0;
        let last = loop {
            let action = policy.act(&observation, &mut rng, true)?;
            let outcome = env.step(action);
            steps += 1;
            observation = outcome.observation;
            if outcome.done {
                break outcome.info;
            }
        };
        report.evacuation_times.push(steps as f32 * dt);
        report
            .success_rates
            .push(last.evacuated / last.population.max(f32::EPSILON));
        report.gini_values.push(last.gini);
    }
    report.summarise();
    info!(
        "[Trainer] Evaluation over {} episodes: time {:.1}s, success {:.0}%, gini {:.3}",
        episodes,
        report.avg_evacuation_time,
        report.avg_success_rate * 100.0,
        report.avg_gini
    );
    Ok(report)
}

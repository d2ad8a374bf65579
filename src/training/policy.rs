//! Actor-critic policy network
//!
//! One shared tanh hidden layer feeding an action-logit head and a scalar
//! value head. Weights are Xavier-initialised from a seeded generator so two
//! trainers with the same seed start from the same network.

use std::collections::HashMap;
use std::path::Path;

use candle_core::{DType, Device, Tensor, Var, D};
use candle_nn::{Linear, Module};
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

use crate::core::{Result, TrainingError};

pub struct ActorCritic {
    device: Device,
    observation_size: usize,
    action_count: usize,
    hidden: Linear,
    actor: Linear,
    critic: Linear,
    vars: Vec<(String, Var)>,
}

/// Uniform Xavier weights `(out, in)` and zero bias.
fn xavier_layer(
    rng: &mut StdRng,
    fan_in: usize,
    fan_out: usize,
    device: &Device,
) -> candle_core::Result<(Var, Var)> {
    let bound = (6.0f32 / (fan_in + fan_out) as f32).sqrt();
    let values: Vec<f32> = (0..fan_in * fan_out).map(|_| rng.gen_range(-bound..bound)).collect();
    let weight = Var::from_tensor(&Tensor::from_vec(values, (fan_out, fan_in), device)?)?;
    let bias = Var::zeros(fan_out, DType::F32, device)?;
    Ok((weight, bias))
}

impl ActorCritic {
    pub fn new(
        observation_size: usize,
        action_count: usize,
        hidden_size: usize,
        seed: u64,
        device: &Device,
    ) -> Result<Self> {
        if action_count == 0 {
            return Err(TrainingError::EmptyActionSpace.into());
        }
        let mut rng = StdRng::seed_from_u64(seed);
        let mut vars = Vec::with_capacity(6);
        let mut layer = |name: &str, fan_in: usize, fan_out: usize| -> candle_core::Result<Linear> {
            let (w, b) = xavier_layer(&mut rng, fan_in, fan_out, device)?;
            let linear = Linear::new(w.as_tensor().clone(), Some(b.as_tensor().clone()));
            vars.push((format!("{name}.weight"), w));
            vars.push((format!("{name}.bias"), b));
            Ok(linear)
        };
        let hidden = layer("hidden", observation_size, hidden_size)?;
        let actor = layer("actor", hidden_size, action_count)?;
        let critic = layer("critic", hidden_size, 1)?;

        info!(
            "[Policy] Actor-critic ready: {} -> {} -> {} actions on {:?}",
            observation_size, hidden_size, action_count, device
        );

        Ok(Self {
            device: device.clone(),
            observation_size,
            action_count,
            hidden,
            actor,
            critic,
            vars,
        })
    }

    pub fn device(&self) -> &Device {
        &self.device
    }

    pub fn observation_size(&self) -> usize {
        self.observation_size
    }

    pub fn action_count(&self) -> usize {
        self.action_count
    }

    /// Trainable variables, for the optimizer.
    pub fn vars(&self) -> Vec<Var> {
        self.vars.iter().map(|(_, v)| v.clone()).collect()
    }

    /// Stack observations into a `(batch, features)` tensor.
    pub fn batch(&self, observations: &[Vec<f32>]) -> Result<Tensor> {
        let mut flat = Vec::with_capacity(observations.len() * self.observation_size);
        for obs in observations {
            if obs.len() != self.observation_size {
                return Err(TrainingError::ObservationShape {
                    expected: self.observation_size,
                    got: obs.len(),
                }
                .into());
            }
            flat.extend_from_slice(obs);
        }
        Ok(Tensor::from_vec(
            flat,
            (observations.len(), self.observation_size),
            &self.device,
        )?)
    }

    /// Action logits `(batch, actions)` and state values `(batch,)`.
    pub fn forward(&self, observations: &Tensor) -> candle_core::Result<(Tensor, Tensor)> {
        let h = self.hidden.forward(observations)?.tanh()?;
        let logits = self.actor.forward(&h)?;
        let values = self.critic.forward(&h)?.squeeze(1)?;
        Ok((logits, values))
    }

    /// Action probabilities for one observation.
    pub fn probabilities(&self, observation: &[f32]) -> Result<Vec<f32>> {
        let input = self.batch(&[observation.to_vec()])?;
        let (logits, _) = self.forward(&input)?;
        let probs = candle_nn::ops::softmax(&logits, D::Minus1)?;
        Ok(probs.squeeze(0)?.to_vec1::<f32>()?)
    }

    /// Sample an action, or take the most likely one when `greedy`.
    /// Degenerate probabilities fall back to the greedy choice.
    pub fn act(&self, observation: &[f32], rng: &mut StdRng, greedy: bool) -> Result<usize> {
        let probs = self.probabilities(observation)?;
        let best = probs
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap_or(0);
        if greedy {
            return Ok(best);
        }
        Ok(match WeightedIndex::new(&probs) {
            Ok(dist) => dist.sample(rng),
            Err(_) => best,
        })
    }

    /// Write every variable to a safetensors checkpoint.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let tensors: HashMap<String, Tensor> = self
            .vars
            .iter()
            .map(|(name, var)| (name.clone(), var.as_tensor().clone()))
            .collect();
        candle_core::safetensors::save(&tensors, path.as_ref())?;
        info!("[Policy] Saved checkpoint to {}", path.as_ref().display());
        Ok(())
    }

    /// Overwrite the variables from a checkpoint written by [`save`](Self::save).
    pub fn load(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let tensors = candle_core::safetensors::load(path.as_ref(), &self.device)?;
        for (name, var) in &self.vars {
            let tensor = tensors
                .get(name)
                .ok_or_else(|| TrainingError::MissingTensor(name.clone()))?;
            var.set(tensor)?;
        }
        info!("[Policy] Loaded checkpoint from {}", path.as_ref().display());
        Ok(())
    }
}

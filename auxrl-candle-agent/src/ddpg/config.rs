//! Configuration of DDPG agent.
use crate::{
    auxiliary::AuxConfig,
    model::{ActorConfig, CriticConfig},
    noise::{ActionNoiseConfig, ParamNoiseConfig},
    opt::AdamConfig,
    Device,
};
use anyhow::Result;
use log::info;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

/// Configuration of [`Ddpg`](super::Ddpg).
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct DdpgConfig {
    /// Configuration of the actor.
    pub actor_config: ActorConfig,

    /// Configuration of the critic.
    pub critic_config: CriticConfig,

    /// Discount factor.
    pub gamma: f64,

    /// Rate of the soft update of target networks.
    pub tau: f64,

    /// Normalizes critic targets with running statistics of returns.
    pub normalize_returns: bool,

    /// Rescales the critic output layer when return statistics change.
    /// Effective only with `normalize_returns`.
    pub enable_popart: bool,

    /// Normalizes observations with running statistics.
    pub normalize_observations: bool,

    /// Batch size for training.
    pub batch_size: usize,

    /// Range of normalized observations.
    pub observation_range: (f32, f32),

    /// Range of actions.
    pub action_range: (f32, f32),

    /// Range of normalized action values.
    pub return_range: (f32, f32),

    /// Adaptive parameter noise, if any.
    pub param_noise: Option<ParamNoiseConfig>,

    /// Action noise, if any.
    pub action_noise: Option<ActionNoiseConfig>,

    /// Weight of L2 regularization of the critic's hidden kernels.
    pub critic_l2_reg: f64,

    /// Learning rate of the actor and of the auxiliary tasks.
    pub actor_lr: f64,

    /// Learning rate of the critic.
    pub critic_lr: f64,

    /// Bound on the norm of each parameter's gradient.
    pub clip_norm: Option<f64>,

    /// Factor applied to rewards when they are stored.
    pub reward_scale: f32,

    /// Auxiliary tasks.
    #[serde(default)]
    pub aux: AuxConfig,

    /// Moments of the Adam optimizers.
    #[serde(default)]
    pub adam: AdamConfig,

    /// Device of the networks.
    pub device: Option<Device>,
}

impl Default for DdpgConfig {
    fn default() -> Self {
        Self {
            actor_config: ActorConfig::default(),
            critic_config: CriticConfig::default(),
            gamma: 0.99,
            tau: 0.001,
            normalize_returns: false,
            enable_popart: false,
            normalize_observations: true,
            batch_size: 128,
            observation_range: (-5., 5.),
            action_range: (-1., 1.),
            return_range: (f32::NEG_INFINITY, f32::INFINITY),
            param_noise: None,
            action_noise: None,
            critic_l2_reg: 0.,
            actor_lr: 1e-4,
            critic_lr: 1e-3,
            clip_norm: None,
            reward_scale: 1.,
            aux: AuxConfig::default(),
            adam: AdamConfig::default(),
            device: None,
        }
    }
}

impl DdpgConfig {
    /// Sets the configuration of the actor.
    pub fn actor_config(mut self, v: ActorConfig) -> Self {
        self.actor_config = v;
        self
    }

    /// Sets the configuration of the critic.
    pub fn critic_config(mut self, v: CriticConfig) -> Self {
        self.critic_config = v;
        self
    }

    /// Sets the discount factor.
    pub fn gamma(mut self, v: f64) -> Self {
        self.gamma = v;
        self
    }

    /// Sets the soft update rate.
    pub fn tau(mut self, v: f64) -> Self {
        self.tau = v;
        self
    }

    /// Enables return normalization, with or without PopArt.
    pub fn normalize_returns(mut self, v: bool, popart: bool) -> Self {
        self.normalize_returns = v;
        self.enable_popart = popart;
        self
    }

    /// Enables observation normalization.
    pub fn normalize_observations(mut self, v: bool) -> Self {
        self.normalize_observations = v;
        self
    }

    /// Sets the batch size.
    pub fn batch_size(mut self, v: usize) -> Self {
        self.batch_size = v;
        self
    }

    /// Sets the range of normalized observations.
    pub fn observation_range(mut self, low: f32, high: f32) -> Self {
        self.observation_range = (low, high);
        self
    }

    /// Sets the range of actions.
    pub fn action_range(mut self, low: f32, high: f32) -> Self {
        self.action_range = (low, high);
        self
    }

    /// Sets the range of normalized action values.
    pub fn return_range(mut self, low: f32, high: f32) -> Self {
        self.return_range = (low, high);
        self
    }

    /// Sets parameter noise.
    pub fn param_noise(mut self, v: Option<ParamNoiseConfig>) -> Self {
        self.param_noise = v;
        self
    }

    /// Sets action noise.
    pub fn action_noise(mut self, v: Option<ActionNoiseConfig>) -> Self {
        self.action_noise = v;
        self
    }

    /// Sets the weight of L2 regularization of the critic.
    pub fn critic_l2_reg(mut self, v: f64) -> Self {
        self.critic_l2_reg = v;
        self
    }

    /// Sets the learning rate of the actor.
    pub fn actor_lr(mut self, v: f64) -> Self {
        self.actor_lr = v;
        self
    }

    /// Sets the learning rate of the critic.
    pub fn critic_lr(mut self, v: f64) -> Self {
        self.critic_lr = v;
        self
    }

    /// Sets the gradient clipping norm.
    pub fn clip_norm(mut self, v: Option<f64>) -> Self {
        self.clip_norm = v;
        self
    }

    /// Sets the reward scale.
    pub fn reward_scale(mut self, v: f32) -> Self {
        self.reward_scale = v;
        self
    }

    /// Sets the auxiliary tasks.
    pub fn aux(mut self, v: AuxConfig) -> Self {
        self.aux = v;
        self
    }

    /// Sets the Adam moments.
    pub fn adam(mut self, v: AdamConfig) -> Self {
        self.adam = v;
        self
    }

    /// Sets the device.
    pub fn device(mut self, device: Device) -> Self {
        self.device = Some(device);
        self
    }

    /// Constructs [`DdpgConfig`] from YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path_ = path.as_ref().to_owned();
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        info!("Load config of DDPG agent from {}", path_.display());
        Ok(b)
    }

    /// Saves [`DdpgConfig`] as YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path_ = path.as_ref().to_owned();
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        info!("Save config of DDPG agent into {}", path_.display());
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tempdir::TempDir;

    #[test]
    fn test_serde_ddpg_config() -> Result<()> {
        let config = DdpgConfig::default()
            .batch_size(64)
            .return_range(-10., 10.)
            .param_noise(Some(ParamNoiseConfig::default().desired_action_stddev(0.2)))
            .action_noise(Some(ActionNoiseConfig::Normal { sigma: 0.1 }))
            .clip_norm(Some(1.0))
            .aux(AuxConfig::default().task("tc", 1.0).task("caus", 0.5))
            .device(Device::Cpu);

        let dir = TempDir::new("ddpg_config")?;
        let path = dir.path().join("ddpg_config.yaml");
        config.save(&path)?;
        let config_ = DdpgConfig::load(&path)?;
        assert_eq!(config, config_);
        Ok(())
    }
}

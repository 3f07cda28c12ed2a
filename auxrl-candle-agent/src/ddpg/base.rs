//! DDPG agent.
use super::{DdpgConfig, TrainStats};
use crate::{
    auxiliary::{AuxEngine, AuxInputs, AuxTask},
    error::AgentError,
    model::{Actor, Critic, ParamSet},
    noise::{ActionNoise, AdaptiveParamNoise},
    opt::SyncAdam,
    util::{denormalize, l2_loss, normalize, normalize_loss, reduce_std},
};
use anyhow::Result;
use auxrl_core::{
    comm::Communicator,
    memory::{ReplayMemory, TransitionBatch, Transitions},
    record::{Record, RecordValue},
    RunningMeanStd,
};
use candle_core::{Device, Tensor};
use log::{debug, info, trace};
use std::{fs, path::Path, sync::Arc};

/// Mutable state of training other than network parameters.
pub struct TrainerState {
    actor_opt: SyncAdam,
    critic_opt: SyncAdam,
    aux_opt: Option<SyncAdam>,
    obs_rms: Option<RunningMeanStd>,
    ret_rms: Option<RunningMeanStd>,
    param_noise: Option<AdaptiveParamNoise>,
    action_noise: Option<Box<dyn ActionNoise + Send>>,

    /// Sample drawn at the first call of `get_stats` and reused afterwards.
    stats_sample: Option<TransitionBatch>,
    initialized: bool,
}

impl TrainerState {
    /// Returns `true` once [`Ddpg::initialize`] has run.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Observation statistics, if observations are normalized.
    pub fn obs_rms(&self) -> Option<&RunningMeanStd> {
        self.obs_rms.as_ref()
    }

    /// Return statistics, if returns are normalized.
    pub fn ret_rms(&self) -> Option<&RunningMeanStd> {
        self.ret_rms.as_ref()
    }

    /// Current scale of parameter noise, if enabled.
    pub fn param_noise_stddev(&self) -> Option<f64> {
        self.param_noise.as_ref().map(|n| n.current_stddev())
    }
}

/// A batch moved to the device.
struct BatchTensors {
    obs0: Tensor,
    actions: Tensor,
    rewards: Tensor,
    obs1: Tensor,
    terminals1: Tensor,
}

fn mean_std(t: &Tensor) -> Result<(f32, f32)> {
    Ok((t.mean_all()?.to_scalar::<f32>()?, reduce_std(t)?))
}

#[cfg_attr(doc, aquamarine::aquamarine)]
/// DDPG agent with auxiliary representation losses.
///
/// A training step runs as follows:
///
/// ```mermaid
/// graph TD
///     M[ReplayMemory] -->|sample / sample_twice| B[Batch]
///     B --> T[Target actor and critic]
///     T -->|target Q| P{PopArt}
///     P --> G[Actor and critic gradients]
///     G -->|averaged over workers| U[Actor and critic updates]
///     U --> A[Auxiliary losses on representations]
///     A -->|averaged over workers| V[Representation and predictor updates]
/// ```
///
/// Target networks move only through [`Ddpg::update_target_net`], whose cadence
/// is left to the caller.
pub struct Ddpg<M: ReplayMemory> {
    config: DdpgConfig,
    obs_dim: usize,
    act_dim: usize,
    device: Device,
    comm: Arc<dyn Communicator>,
    memory: M,
    actor: Actor,
    critic: Critic,
    target_actor: Actor,
    target_critic: Critic,
    param_noise_actor: Option<Actor>,
    adaptive_param_noise_actor: Option<Actor>,
    aux: AuxEngine,
    state: TrainerState,
}

impl<M: ReplayMemory> Ddpg<M> {
    /// Builds the agent.
    ///
    /// Configuration errors, such as unknown or duplicate auxiliary tasks, are
    /// raised here before any optimizer is created.
    pub fn build(
        config: DdpgConfig,
        obs_dim: usize,
        act_dim: usize,
        memory: M,
        comm: Arc<dyn Communicator>,
    ) -> Result<Self> {
        let device = config.device.unwrap_or_default().to_candle()?;
        let actor = Actor::build("actor", obs_dim, act_dim, &config.actor_config, &device)?;
        let critic = Critic::build("critic", obs_dim, act_dim, &config.critic_config, &device)?;
        let aux = AuxEngine::build(&config.aux, &actor, &critic, act_dim)?;

        let target_actor = actor.duplicate("target_actor")?;
        let target_critic = critic.duplicate("target_critic")?;

        let (param_noise_actor, adaptive_param_noise_actor, param_noise) = match &config.param_noise
        {
            Some(c) => {
                info!("setting up param noise");
                (
                    Some(actor.duplicate("param_noise_actor")?),
                    Some(actor.duplicate("adaptive_param_noise_actor")?),
                    Some(AdaptiveParamNoise::new(c)),
                )
            }
            None => (None, None, None),
        };

        let obs_rms = match config.normalize_observations {
            true => Some(RunningMeanStd::new(obs_dim, comm.clone())),
            false => None,
        };
        let ret_rms = match config.normalize_returns {
            true => Some(RunningMeanStd::new(1, comm.clone())),
            false => None,
        };

        info!("setting up actor optimizer");
        actor.log_shapes()?;
        let actor_opt = SyncAdam::new(
            actor.trainable_parameters()?,
            &config.adam,
            config.clip_norm,
            comm.clone(),
        )?;

        info!("setting up critic optimizer");
        critic.log_shapes()?;
        if config.critic_l2_reg > 0. {
            for (k, _) in critic.l2_vars()? {
                info!("  regularizing: {}", k);
            }
            info!("  applying l2 regularization with {}", config.critic_l2_reg);
        }
        let critic_opt = SyncAdam::new(
            critic.trainable_parameters()?,
            &config.adam,
            config.clip_norm,
            comm.clone(),
        )?;

        let aux_opt = match aux.is_empty() {
            true => None,
            false => {
                info!("setting up aux optimizer");
                Some(SyncAdam::new(
                    aux.parameters().to_vec(),
                    &config.adam,
                    config.clip_norm,
                    comm.clone(),
                )?)
            }
        };

        info!("setting up target updates");
        for (dest, src) in target_actor
            .trainable_parameters()?
            .iter()
            .zip(actor.trainable_parameters()?.iter())
            .chain(
                target_critic
                    .trainable_parameters()?
                    .iter()
                    .zip(critic.trainable_parameters()?.iter()),
            )
        {
            info!("  {} <- {}", dest.0, src.0);
        }

        let action_noise = config.action_noise.as_ref().map(|c| c.build(act_dim));

        Ok(Self {
            obs_dim,
            act_dim,
            device,
            comm,
            memory,
            actor,
            critic,
            target_actor,
            target_critic,
            param_noise_actor,
            adaptive_param_noise_actor,
            aux,
            state: TrainerState {
                actor_opt,
                critic_opt,
                aux_opt,
                obs_rms,
                ret_rms,
                param_noise,
                action_noise,
                stats_sample: None,
                initialized: false,
            },
            config,
        })
    }

    /// Synchronizes parameters across workers and copies them to the target networks.
    pub fn initialize(&mut self) -> Result<()> {
        self.state.actor_opt.sync()?;
        self.state.critic_opt.sync()?;
        if let Some(opt) = &self.state.aux_opt {
            opt.sync()?;
        }
        self.target_actor.track(&self.actor, 1.0)?;
        self.target_critic.track(&self.critic, 1.0)?;
        self.perturb_policy()?;
        self.state.initialized = true;
        info!("Initialized DDPG agent");
        Ok(())
    }

    fn check_initialized(&self) -> Result<()> {
        match self.state.is_initialized() {
            true => Ok(()),
            false => Err(AgentError::NotInitialized.into()),
        }
    }

    fn tensor(&self, v: &[f32], cols: usize) -> Result<Tensor> {
        Ok(Tensor::from_slice(v, (v.len() / cols, cols), &self.device)?)
    }

    fn batch_tensors(&self, t: &Transitions) -> Result<BatchTensors> {
        Ok(BatchTensors {
            obs0: self.tensor(&t.obs0, self.obs_dim)?,
            actions: self.tensor(&t.actions, self.act_dim)?,
            rewards: self.tensor(&t.rewards, 1)?,
            obs1: self.tensor(&t.obs1, self.obs_dim)?,
            terminals1: self.tensor(&t.terminals1, 1)?,
        })
    }

    fn rms_tensors(&self, rms: &RunningMeanStd) -> Result<(Tensor, Tensor)> {
        let d = rms.dim();
        Ok((
            Tensor::from_vec(rms.mean(), (1, d), &self.device)?,
            Tensor::from_vec(rms.std(), (1, d), &self.device)?,
        ))
    }

    /// Clamps to `[lo, hi]`. Infinite bounds leave the tensor unchanged.
    fn clip(t: &Tensor, (lo, hi): (f32, f32)) -> Result<Tensor> {
        match lo == f32::NEG_INFINITY && hi == f32::INFINITY {
            true => Ok(t.clone()),
            false => Ok(t.clamp(lo, hi)?),
        }
    }

    fn normalize_obs(&self, obs: &Tensor) -> Result<Tensor> {
        let obs = match &self.state.obs_rms {
            Some(rms) => {
                let (mean, std) = self.rms_tensors(rms)?;
                normalize(obs, &mean, &std)?
            }
            None => obs.clone(),
        };
        Self::clip(&obs, self.config.observation_range)
    }

    /// Denormalizes critic outputs, clipping them to `return_range` first if `clip`.
    fn denormalize_q(&self, q: &Tensor, clip: bool) -> Result<Tensor> {
        let q = match clip {
            true => Self::clip(q, self.config.return_range)?,
            false => q.clone(),
        };
        match &self.state.ret_rms {
            Some(rms) => {
                let (mean, std) = self.rms_tensors(rms)?;
                denormalize(&q, &mean, &std)
            }
            None => Ok(q),
        }
    }

    fn normalize_return(&self, q: &Tensor) -> Result<Tensor> {
        let q = match &self.state.ret_rms {
            Some(rms) => {
                let (mean, std) = self.rms_tensors(rms)?;
                normalize(q, &mean, &std)?
            }
            None => q.clone(),
        };
        Self::clip(&q, self.config.return_range)
    }

    /// `r + (1 - terminal) * gamma * Q'(s', pi'(s'))`, without gradient.
    fn target_q(&self, b: &BatchTensors) -> Result<Tensor> {
        let norm_obs1 = self.normalize_obs(&b.obs1)?;
        let act1 = self.target_actor.forward(&norm_obs1)?;
        let q1 = self.denormalize_q(&self.target_critic.forward(&norm_obs1, &act1)?, false)?;
        let not_done = b.terminals1.affine(-1., 1.)?;
        let target = (&b.rewards + (not_done * q1)?.affine(self.config.gamma, 0.)?)?;
        Ok(target.detach())
    }

    /// Denormalized action values of the critic for row-major observations and actions.
    pub fn critic_q(&self, obs: &[f32], actions: &[f32]) -> Result<Vec<f32>> {
        let obs = self.normalize_obs(&self.tensor(obs, self.obs_dim)?)?;
        let actions = self.tensor(actions, self.act_dim)?;
        let q = self.denormalize_q(&self.critic.forward(&obs, &actions)?, true)?;
        Ok(q.flatten_all()?.to_vec1::<f32>()?)
    }

    /// Selects an action for a single observation.
    ///
    /// With `apply_noise`, the perturbed actor is used if parameter noise is
    /// enabled and action noise is added if configured. The action is clipped
    /// to `action_range`. The value estimate is computed only if `compute_q`.
    pub fn act(
        &mut self,
        obs: &[f32],
        apply_noise: bool,
        compute_q: bool,
    ) -> Result<(Vec<f32>, Option<f32>)> {
        self.check_initialized()?;
        let norm_obs = self.normalize_obs(&self.tensor(obs, self.obs_dim)?)?;
        let policy = match (&self.param_noise_actor, apply_noise) {
            (Some(perturbed), true) => perturbed,
            _ => &self.actor,
        };
        let action = policy.forward(&norm_obs)?;

        let q = match compute_q {
            true => {
                let a = self.actor.forward(&norm_obs)?;
                let q = self.denormalize_q(&self.critic.forward(&norm_obs, &a)?, true)?;
                q.flatten_all()?.to_vec1::<f32>()?.first().copied()
            }
            false => None,
        };

        let mut action = action.flatten_all()?.to_vec1::<f32>()?;
        if apply_noise {
            let act_dim = self.act_dim;
            if let Some(noise) = self.state.action_noise.as_mut() {
                let noise = noise.sample()?;
                if noise.len() != act_dim {
                    return Err(AgentError::NoiseDimension {
                        expected: act_dim,
                        actual: noise.len(),
                    }
                    .into());
                }
                for (a, n) in action.iter_mut().zip(noise) {
                    *a += n;
                }
            }
        }
        let (lo, hi) = self.config.action_range;
        action.iter_mut().for_each(|a| *a = a.clamp(lo, hi));
        Ok((action, q))
    }

    /// Scales the reward, stores the transition and updates observation statistics.
    pub fn store_transition(
        &mut self,
        obs0: &[f32],
        action: &[f32],
        reward: f32,
        obs1: &[f32],
        terminal1: bool,
    ) -> Result<()> {
        let reward = reward * self.config.reward_scale;
        self.memory.append(obs0, action, reward, obs1, terminal1)?;
        if let Some(rms) = self.state.obs_rms.as_mut() {
            rms.update(obs0)?;
        }
        Ok(())
    }

    /// Updates return statistics with critic targets and, with PopArt, rescales
    /// the output layers of the critic and the target critic so that their
    /// denormalized outputs do not change.
    pub fn update_return_stats(&mut self, target_q: &[f32]) -> Result<()> {
        let (old_mean, old_std, new_mean, new_std) = match self.state.ret_rms.as_mut() {
            Some(rms) => {
                let (old_mean, old_std) = (rms.mean()[0] as f64, rms.std()[0] as f64);
                rms.update(target_q)?;
                (old_mean, old_std, rms.mean()[0] as f64, rms.std()[0] as f64)
            }
            None => return Ok(()),
        };
        debug!(
            "ret_rms: mean {} -> {}, std {} -> {}",
            old_mean, new_mean, old_std, new_std
        );

        if self.config.enable_popart {
            for critic in [&self.critic, &self.target_critic] {
                let (w, b) = critic.output_vars()?;
                w.set(&w.as_tensor().affine(old_std / new_std, 0.)?)?;
                b.set(
                    &b.as_tensor()
                        .affine(old_std / new_std, (old_mean - new_mean) / new_std)?,
                )?;
            }
        }
        Ok(())
    }

    fn critic_l2(&self) -> Result<Option<Tensor>> {
        if self.config.critic_l2_reg <= 0. {
            return Ok(None);
        }
        let mut reg: Option<Tensor> = None;
        for (_, v) in self.critic.l2_vars()? {
            let l = l2_loss(v.as_tensor())?;
            reg = Some(match reg {
                Some(r) => (r + l)?,
                None => l,
            });
        }
        match reg {
            Some(r) => Ok(Some(r.affine(self.config.critic_l2_reg, 0.)?)),
            None => Ok(None),
        }
    }

    /// Runs one training step and returns the losses.
    pub fn train(&mut self) -> Result<TrainStats> {
        self.check_initialized()?;

        trace!("sample()");
        let batch = match self.aux.needs_unrelated() {
            true => self.memory.sample_twice(self.config.batch_size)?,
            false => self.memory.sample(self.config.batch_size)?,
        };
        let b = self.batch_tensors(&batch.primary)?;

        trace!("target_q()");
        let target_q = self.target_q(&b)?;
        if self.config.normalize_returns && self.config.enable_popart {
            self.update_return_stats(&target_q.flatten_all()?.to_vec1::<f32>()?)?;
        }

        let norm_obs0 = self.normalize_obs(&b.obs0)?;
        let actor_loss = {
            let a = self.actor.forward(&norm_obs0)?;
            let q = self.denormalize_q(&self.critic.forward(&norm_obs0, &a)?, true)?;
            q.mean_all()?.neg()?
        };
        let critic_loss = {
            let q = self.critic.forward(&norm_obs0, &b.actions)?;
            let target = self.normalize_return(&target_q)?;
            let loss = (q - target)?.sqr()?.mean_all()?;
            match self.critic_l2()? {
                Some(reg) => (loss + reg)?,
                None => loss,
            }
        };

        // Both gradients are taken before either network changes.
        trace!("update actor and critic");
        let actor_grads = normalize_loss(&actor_loss)?.backward()?;
        let actor_flat = self.state.actor_opt.flat_grad(&actor_grads)?;
        let critic_grads = normalize_loss(&critic_loss)?.backward()?;
        let critic_flat = self.state.critic_opt.flat_grad(&critic_grads)?;
        self.state
            .actor_opt
            .update(actor_grads, actor_flat, self.config.actor_lr)?;
        self.state
            .critic_opt
            .update(critic_grads, critic_flat, self.config.critic_lr)?;

        let (aux_loss, aux_losses) = self.train_aux(&batch, &b)?;

        Ok(TrainStats {
            critic_loss: critic_loss.to_scalar::<f32>()?,
            actor_loss: actor_loss.to_scalar::<f32>()?,
            aux_loss,
            aux_losses,
        })
    }

    fn train_aux(
        &mut self,
        batch: &TransitionBatch,
        b: &BatchTensors,
    ) -> Result<(Option<f32>, Vec<(AuxTask, f32)>)> {
        if self.aux.is_empty() {
            return Ok((None, vec![]));
        }

        trace!("update aux");
        let unrelated = match &batch.unrelated {
            Some(t) => Some(self.batch_tensors(t)?),
            None => None,
        };
        let (obs100, obs101) = match &unrelated {
            Some(u) => (
                Some(self.normalize_obs(&u.obs0)?),
                Some(self.normalize_obs(&u.obs1)?),
            ),
            None => (None, None),
        };
        let inputs = AuxInputs {
            obs0: self.normalize_obs(&b.obs0)?,
            obs1: self.normalize_obs(&b.obs1)?,
            actions: b.actions.clone(),
            rewards: b.rewards.clone(),
            obs100,
            obs101,
            actions100: unrelated.as_ref().map(|u| u.actions.clone()),
            rewards100: unrelated.as_ref().map(|u| u.rewards.clone()),
        };

        let losses = match self.aux.compute(&inputs)? {
            Some(losses) => losses,
            None => return Ok((None, vec![])),
        };
        let opt = self
            .state
            .aux_opt
            .as_mut()
            .ok_or(AgentError::NotInitialized)?;
        opt.backward_step(&losses.total, self.config.actor_lr)?;

        Ok((Some(losses.total.to_scalar::<f32>()?), losses.per_task))
    }

    /// Soft update of the target actor and the target critic.
    pub fn update_target_net(&mut self) -> Result<()> {
        self.target_actor.track(&self.actor, self.config.tau)?;
        self.target_critic.track(&self.critic, self.config.tau)?;
        Ok(())
    }

    fn perturb_policy(&self) -> Result<()> {
        if let (Some(noise), Some(actor)) = (&self.state.param_noise, &self.param_noise_actor) {
            actor.perturb_from(&self.actor, noise.current_stddev())?;
        }
        Ok(())
    }

    /// Adapts the scale of parameter noise and returns the measured distance.
    ///
    /// A separate copy of the actor is perturbed at the current scale. The RMS
    /// distance between its actions and the clean actions on a fresh batch is
    /// averaged over workers. Returns 0 if parameter noise is disabled.
    pub fn adapt_param_noise(&mut self) -> Result<f64> {
        self.check_initialized()?;
        let stddev = match &self.state.param_noise {
            Some(noise) => noise.current_stddev(),
            None => return Ok(0.),
        };

        let batch = self.memory.sample(self.config.batch_size)?;
        let norm_obs0 = self.normalize_obs(&self.tensor(batch.obs0(), self.obs_dim)?)?;
        let adaptive = self
            .adaptive_param_noise_actor
            .as_ref()
            .ok_or(AgentError::NotInitialized)?;
        adaptive.perturb_from(&self.actor, stddev)?;
        let distance = (self.actor.forward(&norm_obs0)? - adaptive.forward(&norm_obs0)?)?
            .sqr()?
            .mean_all()?
            .sqrt()?
            .to_scalar::<f32>()?;

        let mut buf = [distance];
        self.comm.allreduce_mean(&mut buf)?;
        let mean_distance = buf[0] as f64;
        if let Some(noise) = self.state.param_noise.as_mut() {
            noise.adapt(mean_distance);
        }
        debug!("param noise distance {}, stddev {}", mean_distance, stddev);
        Ok(mean_distance)
    }

    /// Resets action noise and re-perturbs the exploration actor. Call at episode ends.
    pub fn reset(&mut self) -> Result<()> {
        if let Some(noise) = self.state.action_noise.as_mut() {
            noise.reset();
        }
        self.perturb_policy()
    }

    /// Statistics of value estimates, actions and normalizers.
    ///
    /// They are computed on a sample drawn at the first call and reused, so
    /// successive calls measure changes of the networks on the same inputs.
    pub fn get_stats(&mut self) -> Result<Record> {
        self.check_initialized()?;
        if self.state.stats_sample.is_none() {
            self.state.stats_sample = Some(self.memory.sample(self.config.batch_size)?);
        }
        let (obs0, actions) = match &self.state.stats_sample {
            Some(s) => (
                self.tensor(s.obs0(), self.obs_dim)?,
                self.tensor(s.actions(), self.act_dim)?,
            ),
            None => return Ok(Record::empty()),
        };

        let mut record = Record::empty();
        let mut insert = |name: &str, (mean, std): (f32, f32)| {
            record.insert(format!("{}_mean", name), RecordValue::Scalar(mean));
            record.insert(format!("{}_std", name), RecordValue::Scalar(std));
        };

        if let Some(rms) = &self.state.ret_rms {
            insert("ret_rms", (rms.mean()[0], rms.std()[0]));
        }
        if let Some(rms) = &self.state.obs_rms {
            let avg = |v: Vec<f32>| v.iter().sum::<f32>() / v.len() as f32;
            insert("obs_rms", (avg(rms.mean()), avg(rms.std())));
        }

        let norm_obs0 = self.normalize_obs(&obs0)?;
        let q = self.denormalize_q(&self.critic.forward(&norm_obs0, &actions)?, true)?;
        insert("reference_Q", mean_std(&q)?);

        let action = self.actor.forward(&norm_obs0)?;
        let q = self.denormalize_q(&self.critic.forward(&norm_obs0, &action)?, true)?;
        insert("reference_actor_Q", mean_std(&q)?);
        insert("reference_action", mean_std(&action)?);

        if let Some(perturbed) = &self.param_noise_actor {
            insert(
                "reference_perturbed_action",
                mean_std(&perturbed.forward(&norm_obs0)?)?,
            );
        }

        if let Some(noise) = &self.state.param_noise {
            record.merge_inplace(noise.get_stats());
        }
        Ok(record)
    }

    fn param_sets(&self) -> Vec<&ParamSet> {
        let mut sets = vec![];
        sets.extend(self.actor.param_sets());
        sets.extend(self.critic.param_sets());
        sets.extend(self.target_actor.param_sets());
        sets.extend(self.target_critic.param_sets());
        sets.extend(self.aux.predictors().map(|p| p.head_params()));
        sets
    }

    /// Saves the parameters of all networks in a directory.
    pub fn save_params(&self, path: impl AsRef<Path>) -> Result<()> {
        fs::create_dir_all(&path)?;
        for set in self.param_sets() {
            set.save(path.as_ref())?;
        }
        Ok(())
    }

    /// Loads the parameters of all networks from a directory.
    pub fn load_params(&mut self, path: impl AsRef<Path>) -> Result<()> {
        for set in self.param_sets() {
            set.clone().load(path.as_ref())?;
        }
        self.perturb_policy()
    }

    /// Configuration of the agent.
    pub fn config(&self) -> &DdpgConfig {
        &self.config
    }

    /// Training state.
    pub fn state(&self) -> &TrainerState {
        &self.state
    }

    /// The actor.
    pub fn actor(&self) -> &Actor {
        &self.actor
    }

    /// The critic.
    pub fn critic(&self) -> &Critic {
        &self.critic
    }

    /// The target actor.
    pub fn target_actor(&self) -> &Actor {
        &self.target_actor
    }

    /// The target critic.
    pub fn target_critic(&self) -> &Critic {
        &self.target_critic
    }

    /// The auxiliary task engine.
    pub fn aux(&self) -> &AuxEngine {
        &self.aux
    }

    /// The replay memory.
    pub fn memory(&self) -> &M {
        &self.memory
    }
}

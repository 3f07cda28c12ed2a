//! Actor of the DDPG agent.
use super::{
    is_layer_norm, layers::output, NamedVar, ParamSet, Representation, RepresentationConfig,
    SubModel1,
};
use crate::error::AgentError;
use anyhow::Result;
use candle_core::{Device, Module, Tensor};
use candle_nn::{Linear, VarBuilder};
use log::info;
use serde::{Deserialize, Serialize};

/// Configuration of [`Actor`].
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct ActorConfig {
    /// Number of units of the hidden layers of the representation.
    pub units: usize,

    /// Applies layer normalization in the representation.
    pub layer_norm: bool,
}

impl Default for ActorConfig {
    fn default() -> Self {
        Self {
            units: 64,
            layer_norm: true,
        }
    }
}

impl ActorConfig {
    /// Sets the number of hidden units.
    pub fn units(mut self, v: usize) -> Self {
        self.units = v;
        self
    }

    /// Enables or disables layer normalization.
    pub fn layer_norm(mut self, v: bool) -> Self {
        self.layer_norm = v;
        self
    }
}

/// Output layer of the actor, `tanh(W x + b)`.
pub struct ActorHead {
    output: Linear,
}

impl SubModel1 for ActorHead {
    /// Input and output dimensions.
    type Config = (usize, usize);
    type Input = Tensor;
    type Output = Tensor;

    fn build(vb: VarBuilder, (in_dim, out_dim): Self::Config) -> Result<Self> {
        Ok(Self {
            output: output(in_dim, out_dim, vb.pp("output"))?,
        })
    }

    fn forward(&self, xs: &Tensor) -> Result<Tensor> {
        Ok(self.output.forward(xs)?.tanh()?)
    }
}

/// Deterministic policy, mapping normalized observations to actions in `[-1, 1]`.
///
/// Parameters are split into `<name>_repr` (the representation) and `<name>`
/// (the output layer).
pub struct Actor {
    name: String,
    config: ActorConfig,
    obs_dim: usize,
    act_dim: usize,
    repr_params: ParamSet,
    head_params: ParamSet,
    repr: Representation,
    head: ActorHead,
}

impl Actor {
    /// Builds an actor with freshly initialized parameters.
    pub fn build(
        name: &str,
        obs_dim: usize,
        act_dim: usize,
        config: &ActorConfig,
        device: &Device,
    ) -> Result<Self> {
        let repr_params = ParamSet::new(format!("{}_repr", name), device);
        let head_params = ParamSet::new(name, device);
        let repr = Representation::build(
            repr_params.var_builder(),
            RepresentationConfig {
                in_dim: obs_dim,
                units: config.units,
                layer_norm: config.layer_norm,
            },
        )?;
        let head = ActorHead::build(head_params.var_builder(), (config.units, act_dim))?;

        Ok(Self {
            name: name.to_string(),
            config: config.clone(),
            obs_dim,
            act_dim,
            repr_params,
            head_params,
            repr,
            head,
        })
    }

    /// Builds an actor with its own storage holding a copy of the parameters of `self`.
    pub fn duplicate(&self, name: &str) -> Result<Self> {
        let actor = Self::build(
            name,
            self.obs_dim,
            self.act_dim,
            &self.config,
            self.repr_params.device(),
        )?;
        actor.track(self, 1.0)?;
        Ok(actor)
    }

    /// Outputs actions for a batch of normalized observations.
    pub fn forward(&self, obs: &Tensor) -> Result<Tensor> {
        self.head.forward(&self.repr.forward(obs)?)
    }

    /// Name of the actor.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configuration of the actor.
    pub fn config(&self) -> &ActorConfig {
        &self.config
    }

    /// The representation of the actor.
    pub fn representation(&self) -> &Representation {
        &self.repr
    }

    /// Parameters of the representation.
    pub fn repr_params(&self) -> &ParamSet {
        &self.repr_params
    }

    /// Representation parameters followed by head parameters.
    pub fn param_sets(&self) -> [&ParamSet; 2] {
        [&self.repr_params, &self.head_params]
    }

    /// Union of the representation and head parameters.
    pub fn trainable_parameters(&self) -> Result<Vec<NamedVar>> {
        let mut vars = self.repr_params.named_vars()?;
        vars.extend(self.head_params.named_vars()?);
        Ok(vars)
    }

    /// Parameters that receive noise in parameter-space exploration.
    pub fn perturbable_parameters(&self) -> Result<Vec<NamedVar>> {
        Ok(self
            .trainable_parameters()?
            .into_iter()
            .filter(|(k, _)| !is_layer_norm(k))
            .collect())
    }

    /// Soft update towards `src`.
    pub fn track(&self, src: &Actor, tau: f64) -> Result<()> {
        check_same_size(src.num_params()?, self.num_params()?, &src.name, &self.name)?;
        for (dest, src) in self.param_sets().into_iter().zip(src.param_sets()) {
            dest.track(src, tau)?;
        }
        Ok(())
    }

    /// Sets the parameters to those of `src` plus Gaussian noise.
    ///
    /// Layer normalization parameters are copied without noise.
    pub fn perturb_from(&self, src: &Actor, stddev: f64) -> Result<()> {
        for (dest, src) in self.param_sets().into_iter().zip(src.param_sets()) {
            dest.assign_from(src, |key, t| match is_layer_norm(key) {
                true => Ok(t.clone()),
                false => Ok((t + t.randn_like(0., stddev)?)?),
            })?;
        }
        Ok(())
    }

    /// Total number of scalar parameters.
    pub fn num_params(&self) -> Result<usize> {
        Ok(self.repr_params.num_params()? + self.head_params.num_params()?)
    }

    /// Logs the parameter shapes and count.
    pub fn log_shapes(&self) -> Result<()> {
        let vars = self.trainable_parameters()?;
        let shapes = vars.iter().map(|(_, v)| v.dims().to_vec()).collect::<Vec<_>>();
        info!("  {} shapes: {:?}", self.name, shapes);
        info!("  {} params: {}", self.name, self.num_params()?);
        Ok(())
    }
}

pub(super) fn check_same_size(n_src: usize, n_dest: usize, src: &str, dest: &str) -> Result<()> {
    if n_src != n_dest {
        return Err(AgentError::ParamMismatch {
            src: src.to_string(),
            dest: dest.to_string(),
            detail: format!("{} vs {} parameters", n_src, n_dest),
        }
        .into());
    }
    Ok(())
}

//! Critic of the DDPG agent.
use super::{
    actor::check_same_size,
    layers::{dense, hidden, output, LayerNorm},
    NamedVar, ParamSet, Representation, RepresentationConfig, SubModel1, SubModel2,
};
use crate::error::AgentError;
use anyhow::Result;
use candle_core::{Device, Module, Tensor, Var, D};
use candle_nn::{Linear, VarBuilder};
use log::info;
use serde::{Deserialize, Serialize};

/// Configuration of [`Critic`].
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct CriticConfig {
    /// Number of units of the hidden layers.
    pub units: usize,

    /// Applies layer normalization after the hidden layers.
    pub layer_norm: bool,
}

impl Default for CriticConfig {
    fn default() -> Self {
        Self {
            units: 64,
            layer_norm: true,
        }
    }
}

impl CriticConfig {
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

/// Head of the critic: concatenates the embedding with the action, applies a
/// hidden layer and outputs a scalar.
pub struct CriticHead {
    dense2: Linear,
    ln2: Option<LayerNorm>,
    output: Linear,
}

impl SubModel2 for CriticHead {
    /// Embedding size, action dimension, hidden units and layer normalization.
    type Config = (usize, usize, usize, bool);
    type Input1 = Tensor;
    type Input2 = Tensor;
    type Output = Tensor;

    fn build(vb: VarBuilder, (emb_dim, act_dim, units, layer_norm): Self::Config) -> Result<Self> {
        let ln2 = match layer_norm {
            true => Some(LayerNorm::build(units, vb.pp("ln2"))?),
            false => None,
        };
        Ok(Self {
            dense2: dense(emb_dim + act_dim, units, vb.pp("dense2"))?,
            ln2,
            output: output(units, 1, vb.pp("output"))?,
        })
    }

    fn forward(&self, emb: &Tensor, act: &Tensor) -> Result<Tensor> {
        let xs = Tensor::cat(&[emb, act], D::Minus1)?;
        let xs = hidden(&xs, &self.dense2, &self.ln2)?;
        Ok(self.output.forward(&xs)?)
    }
}

/// Action-value function on normalized observations.
///
/// The output is the normalized value; callers denormalize it with the return
/// statistics. Parameters are split into `<name>_repr` and `<name>`.
pub struct Critic {
    name: String,
    config: CriticConfig,
    obs_dim: usize,
    act_dim: usize,
    repr_params: ParamSet,
    head_params: ParamSet,
    repr: Representation,
    head: CriticHead,
}

impl Critic {
    /// Builds a critic with freshly initialized parameters.
    pub fn build(
        name: &str,
        obs_dim: usize,
        act_dim: usize,
        config: &CriticConfig,
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
        let head = CriticHead::build(
            head_params.var_builder(),
            (config.units, act_dim, config.units, config.layer_norm),
        )?;

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

    /// Builds a critic with its own storage holding a copy of the parameters of `self`.
    pub fn duplicate(&self, name: &str) -> Result<Self> {
        let critic = Self::build(
            name,
            self.obs_dim,
            self.act_dim,
            &self.config,
            self.repr_params.device(),
        )?;
        critic.track(self, 1.0)?;
        Ok(critic)
    }

    /// Outputs normalized action values of shape `(batch, 1)`.
    pub fn forward(&self, obs: &Tensor, act: &Tensor) -> Result<Tensor> {
        self.head.forward(&self.repr.forward(obs)?, act)
    }

    /// Name of the critic.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Configuration of the critic.
    pub fn config(&self) -> &CriticConfig {
        &self.config
    }

    /// The representation of the critic.
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

    /// Dense kernels subject to L2 regularization; the output layer is excluded.
    pub fn l2_vars(&self) -> Result<Vec<NamedVar>> {
        Ok(self
            .trainable_parameters()?
            .into_iter()
            .filter(|(k, _)| {
                let mut it = k.rsplit('.');
                let tensor = it.next();
                let layer = it.next();
                tensor == Some("weight") && layer.map_or(false, |l| l.starts_with("dense"))
            })
            .collect())
    }

    /// Weight and bias of the output layer.
    ///
    /// Fails unless the weight has shape `(1, n)` and the bias has shape `(1,)`.
    pub fn output_vars(&self) -> Result<(Var, Var)> {
        let vars = self
            .head_params
            .named_vars()?
            .into_iter()
            .filter(|(k, _)| k.contains(".output."))
            .collect::<Vec<_>>();
        if vars.len() != 2 {
            return Err(AgentError::PopArtStructure(format!(
                "{} output tensors in {}",
                vars.len(),
                self.name
            ))
            .into());
        }

        // Sorted by name: bias, then weight.
        let (b, w) = (vars[0].1.clone(), vars[1].1.clone());
        let w_ok = w.dims().len() == 2 && w.dims()[0] == 1;
        let b_ok = b.dims() == [1];
        if !(w_ok && b_ok && vars[0].0.ends_with("bias") && vars[1].0.ends_with("weight")) {
            return Err(AgentError::PopArtStructure(format!(
                "weight {:?}, bias {:?}",
                w.dims(),
                b.dims()
            ))
            .into());
        }
        Ok((w, b))
    }

    /// Soft update towards `src`.
    pub fn track(&self, src: &Critic, tau: f64) -> Result<()> {
        check_same_size(src.num_params()?, self.num_params()?, &src.name, &self.name)?;
        for (dest, src) in self.param_sets().into_iter().zip(src.param_sets()) {
            dest.track(src, tau)?;
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

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_critic_forward() -> Result<()> {
        let device = Device::Cpu;
        let critic = Critic::build("critic", 3, 2, &CriticConfig::default(), &device)?;
        let obs = Tensor::randn(0f32, 1f32, (4, 3), &device)?;
        let act = Tensor::randn(0f32, 1f32, (4, 2), &device)?;
        assert_eq!(critic.forward(&obs, &act)?.dims(), &[4, 1]);
        Ok(())
    }

    #[test]
    fn test_l2_and_output_vars() -> Result<()> {
        let critic = Critic::build("critic", 3, 2, &CriticConfig::default(), &Device::Cpu)?;
        let l2 = critic
            .l2_vars()?
            .into_iter()
            .map(|(k, _)| k)
            .collect::<Vec<_>>();
        assert_eq!(
            l2,
            vec![
                "critic_repr.dense0.weight".to_string(),
                "critic_repr.dense1.weight".to_string(),
                "critic.dense2.weight".to_string(),
            ]
        );

        let (w, b) = critic.output_vars()?;
        assert_eq!(w.dims(), &[1, 64]);
        assert_eq!(b.dims(), &[1]);
        Ok(())
    }
}

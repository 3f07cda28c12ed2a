//! Shared feature extractor.
use super::{
    layers::{dense, hidden, LayerNorm},
    SubModel1,
};
use anyhow::Result;
use candle_core::Tensor;
use candle_nn::{Linear, VarBuilder};

/// Configuration of [`Representation`].
#[derive(Clone, Debug, PartialEq)]
pub struct RepresentationConfig {
    /// Dimension of observations.
    pub in_dim: usize,

    /// Number of units of both hidden layers, which is also the embedding size.
    pub units: usize,

    /// Applies layer normalization after each dense layer.
    pub layer_norm: bool,
}

/// Two dense layers, each followed by optional layer normalization and ReLU.
///
/// A clone evaluates the same parameters. Evaluating a representation and its
/// clone on the same input gives identical outputs.
#[derive(Clone)]
pub struct Representation {
    config: RepresentationConfig,
    dense0: Linear,
    ln0: Option<LayerNorm>,
    dense1: Linear,
    ln1: Option<LayerNorm>,
}

impl Representation {
    /// Size of the embedding.
    pub fn out_dim(&self) -> usize {
        self.config.units
    }

    /// Configuration the representation was built with.
    pub fn config(&self) -> &RepresentationConfig {
        &self.config
    }
}

impl SubModel1 for Representation {
    type Config = RepresentationConfig;
    type Input = Tensor;
    type Output = Tensor;

    fn build(vb: VarBuilder, config: Self::Config) -> Result<Self> {
        let units = config.units;
        let ln = |name: &str| -> Result<Option<LayerNorm>> {
            match config.layer_norm {
                true => Ok(Some(LayerNorm::build(units, vb.pp(name))?)),
                false => Ok(None),
            }
        };
        let ln0 = ln("ln0")?;
        let ln1 = ln("ln1")?;

        Ok(Self {
            dense0: dense(config.in_dim, units, vb.pp("dense0"))?,
            dense1: dense(units, units, vb.pp("dense1"))?,
            ln0,
            ln1,
            config,
        })
    }

    fn forward(&self, obs: &Tensor) -> Result<Tensor> {
        let xs = hidden(obs, &self.dense0, &self.ln0)?;
        hidden(&xs, &self.dense1, &self.ln1)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::model::ParamSet;
    use candle_core::Device;

    #[test]
    fn test_reuse_is_bit_identical() -> Result<()> {
        let device = Device::Cpu;
        let params = ParamSet::new("actor_repr", &device);
        let config = RepresentationConfig {
            in_dim: 3,
            units: 64,
            layer_norm: true,
        };
        let repr = Representation::build(params.var_builder(), config)?;
        let reused = repr.clone();

        let obs = Tensor::randn(0f32, 1f32, (5, 3), &device)?;
        let s0 = repr.forward(&obs)?.flatten_all()?.to_vec1::<f32>()?;
        let s1 = reused.forward(&obs)?.flatten_all()?.to_vec1::<f32>()?;
        assert_eq!(s0, s1);
        assert_eq!(s0.len(), 5 * 64);

        // dense0, ln0, dense1, ln1; weight and bias each.
        assert_eq!(params.named_vars()?.len(), 8);
        Ok(())
    }

    #[test]
    fn test_without_layer_norm() -> Result<()> {
        let device = Device::Cpu;
        let params = ParamSet::new("critic_repr", &device);
        let config = RepresentationConfig {
            in_dim: 2,
            units: 16,
            layer_norm: false,
        };
        let repr = Representation::build(params.var_builder(), config)?;
        let obs = Tensor::ones((4, 2), candle_core::DType::F32, &device)?;
        assert_eq!(repr.forward(&obs)?.dims(), &[4, 16]);
        assert_eq!(params.named_vars()?.len(), 4);
        assert_eq!(params.num_params()?, 2 * 16 + 16 + 16 * 16 + 16);
        Ok(())
    }
}

//! Next-observation predictor attached to an existing representation.
use super::{
    layers::{dense, hidden, LayerNorm},
    NamedVar, ParamSet, Representation, SubModel1, SubModel2,
};
use anyhow::Result;
use candle_core::{Module, Tensor, D};
use candle_nn::{Linear, VarBuilder};

/// Head of the predictor: `[embedding, action] -> hidden -> next observation`.
pub struct PredictorHead {
    dense: Linear,
    ln: Option<LayerNorm>,
    output: Linear,
}

impl SubModel2 for PredictorHead {
    /// Embedding size, action dimension, hidden units, observation dimension
    /// and layer normalization.
    type Config = (usize, usize, usize, usize, bool);
    type Input1 = Tensor;
    type Input2 = Tensor;
    type Output = Tensor;

    fn build(
        vb: VarBuilder,
        (emb_dim, act_dim, units, obs_dim, layer_norm): Self::Config,
    ) -> Result<Self> {
        let ln = match layer_norm {
            true => Some(LayerNorm::build(units, vb.pp("ln"))?),
            false => None,
        };
        Ok(Self {
            dense: dense(emb_dim + act_dim, units, vb.pp("dense"))?,
            ln,
            output: dense(units, obs_dim, vb.pp("output"))?,
        })
    }

    fn forward(&self, emb: &Tensor, act: &Tensor) -> Result<Tensor> {
        let xs = Tensor::cat(&[emb, act], D::Minus1)?;
        let xs = hidden(&xs, &self.dense, &self.ln)?;
        Ok(self.output.forward(&xs)?)
    }
}

/// Reconstructs the next observation from the current one and the action.
///
/// The predictor evaluates the representation of its owner (an actor or a
/// critic) rather than a copy of it, so its loss shapes that representation.
/// Its own parameters live in `<owner>_pred`.
pub struct Predictor {
    repr: Representation,
    repr_params: ParamSet,
    head_params: ParamSet,
    head: PredictorHead,
}

impl Predictor {
    /// Attaches a predictor to the representation of `owner`.
    pub fn attach(
        owner: &str,
        repr: &Representation,
        repr_params: &ParamSet,
        act_dim: usize,
    ) -> Result<Self> {
        let config = repr.config();
        let head_params = ParamSet::new(format!("{}_pred", owner), repr_params.device());
        let head = PredictorHead::build(
            head_params.var_builder(),
            (
                repr.out_dim(),
                act_dim,
                config.units,
                config.in_dim,
                config.layer_norm,
            ),
        )?;

        Ok(Self {
            repr: repr.clone(),
            repr_params: repr_params.clone(),
            head_params,
            head,
        })
    }

    /// Predicts normalized next observations.
    pub fn forward(&self, obs: &Tensor, act: &Tensor) -> Result<Tensor> {
        self.head.forward(&self.repr.forward(obs)?, act)
    }

    /// Parameters of the predictor head.
    pub fn head_params(&self) -> &ParamSet {
        &self.head_params
    }

    /// Parameters of the owner's representation followed by the head parameters.
    pub fn trainable_parameters(&self) -> Result<Vec<NamedVar>> {
        let mut vars = self.repr_params.named_vars()?;
        vars.extend(self.head_params.named_vars()?);
        Ok(vars)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::model::{Critic, CriticConfig};
    use candle_core::Device;

    #[test]
    fn test_predictor_uses_owner_representation() -> Result<()> {
        let device = Device::Cpu;
        let critic = Critic::build("critic", 5, 2, &CriticConfig::default(), &device)?;
        let pred = Predictor::attach(
            critic.name(),
            critic.representation(),
            critic.repr_params(),
            2,
        )?;

        let obs = Tensor::randn(0f32, 1f32, (3, 5), &device)?;
        let act = Tensor::randn(0f32, 1f32, (3, 2), &device)?;
        assert_eq!(pred.forward(&obs, &act)?.dims(), &[3, 5]);

        let names = pred
            .trainable_parameters()?
            .into_iter()
            .map(|(k, _)| k)
            .collect::<Vec<_>>();
        assert!(names.contains(&"critic_repr.dense0.weight".to_string()));
        assert!(names.contains(&"critic_pred.output.weight".to_string()));
        assert!(!names.iter().any(|k| k.starts_with("critic.")));

        // The representation is shared: its output changes with the owner's parameters.
        let before = pred.forward(&obs, &act)?.flatten_all()?.to_vec1::<f32>()?;
        let w = critic.repr_params().get("dense0.weight")?;
        w.set(&w.as_tensor().affine(2.0, 0.1)?)?;
        let after = pred.forward(&obs, &act)?.flatten_all()?.to_vec1::<f32>()?;
        assert_ne!(before, after);
        Ok(())
    }
}

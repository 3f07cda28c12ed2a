//! Layers shared by the networks.
use anyhow::Result;
use candle_core::{Module, Tensor, D};
use candle_nn::{Init, Linear, VarBuilder};

/// Dense layer with Glorot uniform weights and zero bias.
pub(crate) fn dense(in_dim: usize, out_dim: usize, vb: VarBuilder) -> Result<Linear> {
    let limit = (6. / (in_dim + out_dim) as f64).sqrt();
    let init = Init::Uniform {
        lo: -limit,
        up: limit,
    };
    let w = vb.get_with_hints((out_dim, in_dim), "weight", init)?;
    let b = vb.get_with_hints(out_dim, "bias", Init::Const(0.))?;
    Ok(Linear::new(w, Some(b)))
}

/// Output layer with weights drawn from `U(-3e-3, 3e-3)` and zero bias.
pub(crate) fn output(in_dim: usize, out_dim: usize, vb: VarBuilder) -> Result<Linear> {
    let init = Init::Uniform {
        lo: -3e-3,
        up: 3e-3,
    };
    let w = vb.get_with_hints((out_dim, in_dim), "weight", init)?;
    let b = vb.get_with_hints(out_dim, "bias", Init::Const(0.))?;
    Ok(Linear::new(w, Some(b)))
}

/// Layer normalization over the last axis with a learned scale and shift.
///
/// Written with primitive tensor ops so that gradients flow to the input and
/// to both parameters.
#[derive(Clone, Debug)]
pub(crate) struct LayerNorm {
    weight: Tensor,
    bias: Tensor,
    eps: f64,
}

impl LayerNorm {
    pub fn build(size: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            weight: vb.get_with_hints(size, "weight", Init::Const(1.))?,
            bias: vb.get_with_hints(size, "bias", Init::Const(0.))?,
            eps: 1e-5,
        })
    }
}

impl Module for LayerNorm {
    fn forward(&self, xs: &Tensor) -> candle_core::Result<Tensor> {
        let xs = xs.broadcast_sub(&xs.mean_keepdim(D::Minus1)?)?;
        let var = xs.sqr()?.mean_keepdim(D::Minus1)?;
        xs.broadcast_div(&var.affine(1., self.eps)?.sqrt()?)?
            .broadcast_mul(&self.weight)?
            .broadcast_add(&self.bias)
    }
}

/// `relu(ln(dense(xs)))`, skipping normalization when `ln` is `None`.
pub(crate) fn hidden(xs: &Tensor, dense: &Linear, ln: &Option<LayerNorm>) -> Result<Tensor> {
    let xs = dense.forward(xs)?;
    let xs = match ln {
        Some(ln) => ln.forward(&xs)?,
        None => xs,
    };
    Ok(xs.relu()?)
}

#[cfg(test)]
mod test {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn test_dense_init() -> Result<()> {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        let layer = dense(64, 32, vb.pp("fc"))?;

        let limit = (6f32 / 96.).sqrt();
        let w = layer.weight().flatten_all()?.to_vec1::<f32>()?;
        assert_eq!(w.len(), 64 * 32);
        assert!(w.iter().all(|w| w.abs() <= limit));
        // Spread over the whole range rather than candle's narrower default.
        assert!(w.iter().any(|w| w.abs() > 0.8 * limit));

        let b = layer.bias().map(|b| b.to_vec1::<f32>()).transpose()?;
        assert_eq!(b, Some(vec![0.; 32]));
        Ok(())
    }
}

//! Utilities.
use crate::error::AgentError;
use anyhow::Result;
use candle_core::{Tensor, D};
use candle_nn::VarMap;
use log::trace;

/// Apply soft update on variables.
///
/// Variables are identified by their names.
///
/// dest = tau * src + (1.0 - tau) * dest
pub fn track(dest: &VarMap, src: &VarMap, tau: f64) -> Result<()> {
    trace!("dest");
    let dest = dest
        .data()
        .lock()
        .map_err(|_| AgentError::PoisonedParams("dest".to_string()))?;
    trace!("src");
    let src = src
        .data()
        .lock()
        .map_err(|_| AgentError::PoisonedParams("src".to_string()))?;

    if dest.len() != src.len() {
        return Err(AgentError::ParamMismatch {
            src: "src".to_string(),
            dest: "dest".to_string(),
            detail: format!("{} vs {} tensors", src.len(), dest.len()),
        }
        .into());
    }

    for (k_dest, v_dest) in dest.iter() {
        let v_src = src.get(k_dest).ok_or_else(|| AgentError::ParamMismatch {
            src: "src".to_string(),
            dest: "dest".to_string(),
            detail: format!("{} is missing in src", k_dest),
        })?;
        let t_src = v_src.as_tensor();
        let t_dest = v_dest.as_tensor();
        let t_dest = (t_src.affine(tau, 0.)? + t_dest.affine(1.0 - tau, 0.)?)?;
        v_dest.set(&t_dest)?;
    }

    Ok(())
}

/// Divides a loss by its own detached magnitude.
///
/// The value is about ±1 while the gradient direction is the one of `loss`.
pub fn normalize_loss(loss: &Tensor) -> Result<Tensor> {
    let scale = loss.detach().abs()?.affine(1.0, 1e-9)?;
    Ok(loss.broadcast_div(&scale)?)
}

/// `exp(-decay * x)`, equal to 1 at 0 and strictly decreasing for `decay > 0`.
pub fn similarity(x: &Tensor, decay: f64) -> Result<Tensor> {
    Ok(x.affine(-decay, 0.)?.exp()?)
}

/// Mean squared magnitude along the last axis.
pub fn sq_magnitude(x: &Tensor) -> Result<Tensor> {
    Ok(x.sqr()?.mean(D::Minus1)?)
}

/// Sum of squares divided by two.
pub fn l2_loss(x: &Tensor) -> Result<Tensor> {
    Ok(x.sqr()?.sum_all()?.affine(0.5, 0.)?)
}

/// Returns the standard deviation of all elements of a tensor.
pub fn reduce_std(t: &Tensor) -> Result<f32> {
    Ok(t.broadcast_sub(&t.mean_all()?)?
        .sqr()?
        .mean_all()?
        .sqrt()?
        .to_scalar::<f32>()?)
}

/// `(x - mean) / std`, broadcast over the batch axis.
pub fn normalize(x: &Tensor, mean: &Tensor, std: &Tensor) -> Result<Tensor> {
    Ok(x.broadcast_sub(mean)?.broadcast_div(std)?)
}

/// `x * std + mean`, broadcast over the batch axis.
pub fn denormalize(x: &Tensor, mean: &Tensor, std: &Tensor) -> Result<Tensor> {
    Ok(x.broadcast_mul(std)?.broadcast_add(mean)?)
}

#[cfg(test)]
mod test {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::Init;

    fn varmap(v: &[f32]) -> Result<VarMap> {
        let vm = VarMap::new();
        let init = Init::Randn {
            mean: 0.0,
            stdev: 1.0,
        };
        vm.get((v.len(),), "var1", init, DType::F32, &Device::Cpu)?;
        let t = Tensor::from_slice(v, (v.len(),), &Device::Cpu)?;
        vm.data().lock().unwrap().get("var1").unwrap().set(&t)?;
        Ok(vm)
    }

    fn var1(vm: &VarMap) -> Vec<f32> {
        vm.data()
            .lock()
            .unwrap()
            .get("var1")
            .unwrap()
            .as_tensor()
            .to_vec1()
            .unwrap()
    }

    #[test]
    fn test_track() -> Result<()> {
        let tau = 0.7;
        let vm_src = varmap(&[1.0, 2.0, 3.0])?;
        let vm_dest = varmap(&[4.0, 5.0, 6.0])?;
        track(&vm_dest, &vm_src, tau)?;

        let expected = [1.9f32, 2.9, 3.9];
        for (x, y) in var1(&vm_dest).iter().zip(expected.iter()) {
            assert!((x - y).abs() < 1e-6);
        }
        assert_eq!(var1(&vm_src), vec![1.0, 2.0, 3.0]);
        Ok(())
    }

    #[test]
    fn test_track_hard_copy() -> Result<()> {
        let vm_src = varmap(&[0.1, -0.2, 0.3])?;
        let vm_dest = varmap(&[4.0, 5.0, 6.0])?;
        track(&vm_dest, &vm_src, 1.0)?;
        assert_eq!(var1(&vm_dest), var1(&vm_src));
        Ok(())
    }

    #[test]
    fn test_similarity() -> Result<()> {
        let x = Tensor::new(&[0.0f32, 0.1, 0.5, 1.0, 3.0], &Device::Cpu)?;
        let s = similarity(&x, 10.0)?.to_vec1::<f32>()?;
        assert_eq!(s[0], 1.0);
        assert!(s.windows(2).all(|w| w[1] < w[0]));

        // A smaller decay gives a slower drop.
        let s2 = similarity(&x, 1.0)?.to_vec1::<f32>()?;
        assert!(s2[1] > s[1]);
        Ok(())
    }

    #[test]
    fn test_normalize_loss() -> Result<()> {
        let loss = Tensor::new(-42.0f32, &Device::Cpu)?;
        let v = normalize_loss(&loss)?.to_scalar::<f32>()?;
        assert!((v + 1.0).abs() < 1e-6);
        Ok(())
    }
}

//! Loss functions of the auxiliary tasks.
//!
//! `s0`, `s1` are embeddings of the current and next observations of the
//! primary sample and `s100`, `s101` those of the unrelated sample. `a`, `a100`
//! are the actions and `r`, `r100` the rewards, shaped `(batch, 1)`. With
//! `mag(x)`, the mean of squares along the feature axis, and
//! `sim(x) = exp(-k x)`, every loss is a mean over the batch.
use crate::util::{l2_loss, similarity, sq_magnitude};
use anyhow::Result;
use candle_core::Tensor;

/// Temporal coherence.
///
/// `sim(mag(s1 - s0)) * mag(a) + sim(mag(a)) * mag(s1 - s0)`: a small change of
/// state should come with a small action, and a large one with a large action.
pub fn temporal_coherence(s0: &Tensor, s1: &Tensor, a: &Tensor, decay: f64) -> Result<Tensor> {
    let ds = sq_magnitude(&(s1 - s0)?)?;
    let da = sq_magnitude(a)?;
    let l1 = (similarity(&ds, decay)? * &da)?;
    let l2 = (similarity(&da, decay)? * &ds)?;
    Ok((l1 + l2)?.mean_all()?)
}

/// Proportionality.
///
/// `(mag(s1 - s0) - mag(s101 - s100))^2 * sim(mag(a100 - a))`: similar actions
/// should change the state by similar amounts.
pub fn proportionality(
    s0: &Tensor,
    s1: &Tensor,
    s100: &Tensor,
    s101: &Tensor,
    a: &Tensor,
    a100: &Tensor,
    decay: f64,
) -> Result<Tensor> {
    let ds = sq_magnitude(&(s1 - s0)?)?;
    let ds100 = sq_magnitude(&(s101 - s100)?)?;
    let sim_a = similarity(&sq_magnitude(&(a100 - a)?)?, decay)?;
    Ok(((ds - ds100)?.sqr()? * sim_a)?.mean_all()?)
}

/// Causality.
///
/// `sim(mag(s100 - s0)) * sim(mag(a100 - a)) * mag(r100 - r)`: states where
/// similar actions lead to different rewards should be far apart.
pub fn causality(
    s0: &Tensor,
    s100: &Tensor,
    a: &Tensor,
    a100: &Tensor,
    r: &Tensor,
    r100: &Tensor,
    decay: f64,
) -> Result<Tensor> {
    let sim_s = similarity(&sq_magnitude(&(s100 - s0)?)?, decay)?;
    let sim_a = similarity(&sq_magnitude(&(a100 - a)?)?, decay)?;
    let dr = sq_magnitude(&(r100 - r)?)?;
    Ok((sim_s * sim_a)?.mul(&dr)?.mean_all()?)
}

/// Repeatability.
///
/// `mag((s101 - s100) - (s1 - s0)) * sim(mag(s100 - s0)) * sim(mag(a100 - a))`:
/// the same action in similar states should change the state the same way.
pub fn repeatability(
    s0: &Tensor,
    s1: &Tensor,
    s100: &Tensor,
    s101: &Tensor,
    a: &Tensor,
    a100: &Tensor,
    decay: f64,
) -> Result<Tensor> {
    let dds = sq_magnitude(&((s101 - s100)? - (s1 - s0)?)?)?;
    let sim_s = similarity(&sq_magnitude(&(s100 - s0)?)?, decay)?;
    let sim_a = similarity(&sq_magnitude(&(a100 - a)?)?, decay)?;
    Ok((dds * sim_s)?.mul(&sim_a)?.mean_all()?)
}

/// Reconstruction error of the next observation, `sum((pred - obs1)^2) / 2`.
pub fn prediction(pred: &Tensor, obs1: &Tensor) -> Result<Tensor> {
    l2_loss(&(pred - obs1)?)
}

#[cfg(test)]
mod test {
    use super::*;
    use candle_core::Device;

    fn t(v: &[f32], rows: usize) -> Tensor {
        Tensor::from_slice(v, (rows, v.len() / rows), &Device::Cpu).unwrap()
    }

    #[test]
    fn test_causality_identical_states_different_rewards() -> Result<()> {
        let s = t(&[0.3, -0.2, 0.5, 0.3, -0.2, 0.5], 2);
        let a = t(&[0.1, 0.1], 2);
        let r = t(&[1.0, 1.0], 2);
        let r100 = t(&[5.0, 5.0], 2);
        let loss = causality(&s, &s, &a, &a, &r, &r100, 10.0)?.to_scalar::<f32>()?;
        assert!((loss - 16.0).abs() < 1e-4);
        Ok(())
    }

    #[test]
    fn test_causality_vanishes_for_equal_rewards() -> Result<()> {
        let s0 = t(&[0.0, 1.0], 1);
        let s100 = t(&[0.5, 0.0], 1);
        let a = t(&[0.2], 1);
        let r = t(&[2.0], 1);
        let loss = causality(&s0, &s100, &a, &a, &r, &r, 10.0)?.to_scalar::<f32>()?;
        assert_eq!(loss, 0.0);
        Ok(())
    }

    #[test]
    fn test_temporal_coherence() -> Result<()> {
        // No state change and no action: nothing to penalize.
        let s = t(&[0.1, 0.2], 1);
        let zero = t(&[0.0], 1);
        let loss = temporal_coherence(&s, &s, &zero, 10.0)?.to_scalar::<f32>()?;
        assert_eq!(loss, 0.0);

        // No state change with a large action is penalized by mag(a).
        let a = t(&[2.0], 1);
        let loss = temporal_coherence(&s, &s, &a, 10.0)?.to_scalar::<f32>()?;
        assert!((loss - 4.0).abs() < 1e-5);
        Ok(())
    }

    #[test]
    fn test_proportionality_and_repeatability() -> Result<()> {
        let s0 = t(&[0.0, 0.0], 1);
        let s1 = t(&[1.0, 1.0], 1);
        let a = t(&[0.5], 1);

        // The same transition repeated: both losses vanish.
        let prop = proportionality(&s0, &s1, &s0, &s1, &a, &a, 10.0)?.to_scalar::<f32>()?;
        let rep = repeatability(&s0, &s1, &s0, &s1, &a, &a, 10.0)?.to_scalar::<f32>()?;
        assert_eq!(prop, 0.0);
        assert_eq!(rep, 0.0);

        // Same start and action but no state change for the unrelated sample.
        let prop = proportionality(&s0, &s1, &s0, &s0, &a, &a, 10.0)?.to_scalar::<f32>()?;
        let rep = repeatability(&s0, &s1, &s0, &s0, &a, &a, 10.0)?.to_scalar::<f32>()?;
        assert!((prop - 1.0).abs() < 1e-6);
        assert!((rep - 1.0).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn test_prediction() -> Result<()> {
        let pred = t(&[1.0, 2.0], 1);
        let obs1 = t(&[0.0, 0.0], 1);
        assert_eq!(prediction(&pred, &obs1)?.to_scalar::<f32>()?, 2.5);
        Ok(())
    }
}

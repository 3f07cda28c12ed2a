//! Adam optimizer synchronized across workers.
use crate::model::NamedVar;
use anyhow::Result;
use auxrl_core::comm::Communicator;
use candle_core::{backprop::GradStore, Tensor, Var};
use candle_nn::{AdamW, Optimizer as _, ParamsAdamW};
use candle_optimisers::adam::{Adam, ParamsAdam};
use log::info;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Configuration of [`SyncAdam`].
///
/// With `weight_decay`, parameters are updated by AdamW with decoupled decay.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct AdamConfig {
    #[serde(default = "default_beta1")]
    pub beta1: f64,
    #[serde(default = "default_beta2")]
    pub beta2: f64,
    #[serde(default = "default_eps")]
    pub eps: f64,
    #[serde(default)]
    pub weight_decay: Option<f64>,
}

fn default_beta1() -> f64 {
    0.9
}

fn default_beta2() -> f64 {
    0.999
}

fn default_eps() -> f64 {
    1e-8
}

impl Default for AdamConfig {
    fn default() -> Self {
        Self {
            beta1: default_beta1(),
            beta2: default_beta2(),
            eps: default_eps(),
            weight_decay: None,
        }
    }
}

impl AdamConfig {
    fn build(&self, vars: Vec<Var>) -> Result<Optimizer> {
        match self.weight_decay {
            None => {
                let params = ParamsAdam {
                    lr: 1e-3,
                    beta_1: self.beta1,
                    beta_2: self.beta2,
                    eps: self.eps,
                    ..ParamsAdam::default()
                };
                Ok(Optimizer::Adam(Adam::new(vars, params)?))
            }
            Some(weight_decay) => {
                let params = ParamsAdamW {
                    lr: 1e-3,
                    beta1: self.beta1,
                    beta2: self.beta2,
                    eps: self.eps,
                    weight_decay,
                };
                Ok(Optimizer::AdamW(AdamW::new(vars, params)?))
            }
        }
    }
}

enum Optimizer {
    AdamW(AdamW),
    Adam(Adam),
}

impl Optimizer {
    fn step(&mut self, grads: &GradStore, lr: f64) -> Result<()> {
        match self {
            Self::AdamW(opt) => {
                opt.set_learning_rate(lr);
                Ok(opt.step(grads)?)
            }
            Self::Adam(opt) => {
                opt.set_learning_rate(lr);
                Ok(opt.step(grads)?)
            }
        }
    }
}

/// Adam over a fixed list of parameters, with gradients averaged over workers.
///
/// Gradients are flattened in the order of the parameter list, so every worker
/// must build the optimizer from the same list. The learning rate is given at
/// each update, which lets one optimizer serve several losses.
pub struct SyncAdam {
    vars: Vec<NamedVar>,
    clip_norm: Option<f64>,
    opt: Optimizer,
    num_params: usize,
    t: i32,
    comm: Arc<dyn Communicator>,
}

impl SyncAdam {
    /// Creates the optimizer. `clip_norm` bounds the L2 norm of each parameter's gradient.
    pub fn new(
        vars: Vec<NamedVar>,
        config: &AdamConfig,
        clip_norm: Option<f64>,
        comm: Arc<dyn Communicator>,
    ) -> Result<Self> {
        let num_params = vars.iter().map(|(_, v)| v.elem_count()).sum();
        let opt = config.build(vars.iter().map(|(_, v)| v.clone()).collect())?;
        Ok(Self {
            vars,
            clip_norm,
            opt,
            num_params,
            t: 0,
            comm,
        })
    }

    /// Total number of scalar parameters.
    pub fn num_params(&self) -> usize {
        self.num_params
    }

    /// Number of updates applied so far.
    pub fn step_count(&self) -> i32 {
        self.t
    }

    /// Flattens the gradients of the parameters.
    ///
    /// Parameters without a gradient contribute zeros.
    pub fn flat_grad(&self, grads: &GradStore) -> Result<Vec<f32>> {
        let mut flat = Vec::with_capacity(self.num_params());
        for (_, var) in self.vars.iter() {
            match grads.get(var.as_tensor()) {
                Some(g) => {
                    let g = match self.clip_norm {
                        Some(clip) => clip_by_norm(g, clip)?,
                        None => g.clone(),
                    };
                    flat.extend(g.flatten_all()?.to_vec1::<f32>()?);
                }
                None => flat.extend(std::iter::repeat(0f32).take(var.elem_count())),
            }
        }
        Ok(flat)
    }

    /// Averages `flat_grad` over workers and applies one Adam step.
    ///
    /// The averaged gradients replace those of the parameters in `grads`
    /// before the step.
    pub fn update(
        &mut self,
        mut grads: GradStore,
        mut flat_grad: Vec<f32>,
        stepsize: f64,
    ) -> Result<()> {
        self.comm.allreduce_mean(&mut flat_grad)?;

        let mut offset = 0;
        for (_, var) in self.vars.iter() {
            let n = var.elem_count();
            let g = Tensor::from_slice(&flat_grad[offset..offset + n], var.dims(), var.device())?;
            grads.insert(var.as_tensor(), g);
            offset += n;
        }

        self.opt.step(&grads, stepsize)?;
        self.t += 1;
        Ok(())
    }

    /// Computes the gradient of `loss` and applies one step.
    pub fn backward_step(&mut self, loss: &Tensor, stepsize: f64) -> Result<()> {
        let grads = loss.backward()?;
        let flat = self.flat_grad(&grads)?;
        self.update(grads, flat, stepsize)
    }

    /// Overwrites the parameters with those of worker 0.
    pub fn sync(&self) -> Result<()> {
        let mut flat = Vec::with_capacity(self.num_params());
        for (_, var) in self.vars.iter() {
            flat.extend(var.as_tensor().flatten_all()?.to_vec1::<f32>()?);
        }
        self.comm.broadcast(&mut flat, 0)?;

        let mut offset = 0;
        for (_, var) in self.vars.iter() {
            let n = var.elem_count();
            var.set(&Tensor::from_slice(
                &flat[offset..offset + n],
                var.dims(),
                var.device(),
            )?)?;
            offset += n;
        }
        info!("Synchronized {} parameters", self.num_params());
        Ok(())
    }
}

/// Rescales `g` so that its L2 norm does not exceed `clip`.
fn clip_by_norm(g: &Tensor, clip: f64) -> Result<Tensor> {
    let norm = g.sqr()?.sum_all()?.sqrt()?.to_scalar::<f32>()? as f64;
    match norm > clip {
        true => Ok(g.affine(clip / norm, 0.)?),
        false => Ok(g.clone()),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use auxrl_core::comm::{LocalComm, ThreadGroupComm};
    use candle_core::Device;
    use std::thread;

    fn var(v: &[f32]) -> Result<Var> {
        Ok(Var::from_tensor(&Tensor::from_slice(
            v,
            (v.len(),),
            &Device::Cpu,
        )?)?)
    }

    #[test]
    fn test_first_step() -> Result<()> {
        // The first Adam step moves each parameter by about `lr` against its gradient sign.
        let x = var(&[1.0, -2.0, 3.0])?;
        let mut opt = SyncAdam::new(
            vec![("x".to_string(), x.clone())],
            &AdamConfig::default(),
            None,
            Arc::new(LocalComm),
        )?;
        let loss = (x.as_tensor() * x.as_tensor())?.sum_all()?;
        opt.backward_step(&loss, 0.01)?;

        let y = x.as_tensor().to_vec1::<f32>()?;
        let expected = [0.99, -1.99, 2.99];
        for (y, e) in y.iter().zip(expected.iter()) {
            assert!((y - e).abs() < 1e-5);
        }
        assert_eq!(opt.step_count(), 1);
        Ok(())
    }

    #[test]
    fn test_missing_grad_is_zero() -> Result<()> {
        let x = var(&[1.0])?;
        let unused = var(&[5.0, 6.0])?;
        let mut opt = SyncAdam::new(
            vec![("x".to_string(), x.clone()), ("z".to_string(), unused.clone())],
            &AdamConfig::default(),
            None,
            Arc::new(LocalComm),
        )?;
        let loss = x.as_tensor().sum_all()?;
        let grads = loss.backward()?;
        let g = opt.flat_grad(&grads)?;
        assert_eq!(g, vec![1.0, 0.0, 0.0]);
        opt.update(grads, g, 0.1)?;
        assert_eq!(unused.as_tensor().to_vec1::<f32>()?, vec![5.0, 6.0]);
        Ok(())
    }

    #[test]
    fn test_clip_norm() -> Result<()> {
        let x = var(&[3.0, 4.0])?;
        let opt = SyncAdam::new(
            vec![("x".to_string(), x.clone())],
            &AdamConfig::default(),
            Some(1.0),
            Arc::new(LocalComm),
        )?;
        // d/dx of 0.5 * |x|^2 is x, whose norm is 5.
        let loss = (x.as_tensor().sqr()?.sum_all()? * 0.5)?;
        let g = opt.flat_grad(&loss.backward()?)?;
        assert!((g[0] - 0.6).abs() < 1e-6);
        assert!((g[1] - 0.8).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn test_steps_follow_averaged_gradient() -> Result<()> {
        // The step uses the gradient passed in, not the one held by the store.
        let x = var(&[0.0, 0.0])?;
        let mut opt = SyncAdam::new(
            vec![("x".to_string(), x.clone())],
            &AdamConfig::default(),
            None,
            Arc::new(LocalComm),
        )?;
        let grads = x.as_tensor().sum_all()?.backward()?;
        opt.update(grads, vec![-4.0, 0.5], 0.1)?;
        let y = x.as_tensor().to_vec1::<f32>()?;
        assert!((y[0] - 0.1).abs() < 1e-5);
        assert!((y[1] + 0.1).abs() < 1e-5);
        Ok(())
    }

    #[test]
    fn test_weight_decay() -> Result<()> {
        let x = var(&[2.0])?;
        let config = AdamConfig {
            weight_decay: Some(0.5),
            ..AdamConfig::default()
        };
        let mut opt =
            SyncAdam::new(vec![("x".to_string(), x.clone())], &config, None, Arc::new(LocalComm))?;
        let grads = x.as_tensor().sum_all()?.backward()?;
        opt.update(grads, vec![0.0], 0.1)?;
        // Decoupled decay shrinks x by lr * weight_decay even with a zero gradient.
        let y = x.as_tensor().to_vec1::<f32>()?;
        assert!((y[0] - 1.9).abs() < 1e-5);
        Ok(())
    }

    #[test]
    fn test_workers_stay_consistent() {
        let handles = ThreadGroupComm::group(2)
            .into_iter()
            .map(|comm| {
                thread::spawn(move || -> Result<Vec<f32>> {
                    let r = comm.rank() as f32;
                    // Workers start from different values and see different gradients.
                    let x = var(&[r, 10.0 * r])?;
                    let mut opt = SyncAdam::new(
                        vec![("x".to_string(), x.clone())],
                        &AdamConfig::default(),
                        None,
                        Arc::new(comm),
                    )?;
                    opt.sync()?;
                    for _ in 0..3 {
                        let grads = x.as_tensor().sum_all()?.backward()?;
                        opt.update(grads, vec![r + 1.0, -r], 0.1)?;
                    }
                    Ok(x.as_tensor().to_vec1::<f32>()?)
                })
            })
            .collect::<Vec<_>>();

        let results = handles
            .into_iter()
            .map(|h| h.join().unwrap().unwrap())
            .collect::<Vec<_>>();
        assert_eq!(results[0], results[1]);
    }
}

//! Exploration noise.
//!
//! Action noise is added to the output of the actor. Parameter noise perturbs a
//! copy of the actor instead; its scale is adapted so that the induced change
//! of actions stays close to a target.
use anyhow::Result;
use auxrl_core::record::{Record, RecordValue};
use candle_core::{Device, Tensor};
use serde::{Deserialize, Serialize};

/// Draws `n` samples of a standard normal distribution.
fn standard_normal(n: usize) -> Result<Vec<f32>> {
    Ok(Tensor::randn(0f32, 1f32, n, &Device::Cpu)?.to_vec1::<f32>()?)
}

/// Noise added to actions.
pub trait ActionNoise {
    /// Returns a noise vector of the action dimension.
    fn sample(&mut self) -> Result<Vec<f32>>;

    /// Resets the internal state at the end of an episode.
    fn reset(&mut self);
}

/// Independent Gaussian noise, `mu + sigma * N(0, 1)`.
pub struct NormalActionNoise {
    mu: Vec<f32>,
    sigma: Vec<f32>,
}

impl NormalActionNoise {
    /// Creates the noise.
    pub fn new(mu: Vec<f32>, sigma: Vec<f32>) -> Self {
        Self { mu, sigma }
    }
}

impl ActionNoise for NormalActionNoise {
    fn sample(&mut self) -> Result<Vec<f32>> {
        let n = standard_normal(self.mu.len())?;
        Ok(self
            .mu
            .iter()
            .zip(self.sigma.iter())
            .zip(n.iter())
            .map(|((m, s), n)| m + s * n)
            .collect())
    }

    fn reset(&mut self) {}
}

/// Ornstein-Uhlenbeck process.
///
/// `x <- x + theta * (mu - x) * dt + sigma * sqrt(dt) * N(0, 1)`
pub struct OrnsteinUhlenbeckActionNoise {
    mu: Vec<f32>,
    sigma: Vec<f32>,
    theta: f32,
    dt: f32,
    x0: Option<Vec<f32>>,
    x_prev: Vec<f32>,
}

impl OrnsteinUhlenbeckActionNoise {
    /// Creates the process, starting at `x0` or at zero.
    pub fn new(mu: Vec<f32>, sigma: Vec<f32>, theta: f32, dt: f32, x0: Option<Vec<f32>>) -> Self {
        let mut noise = Self {
            x_prev: vec![0.; mu.len()],
            mu,
            sigma,
            theta,
            dt,
            x0,
        };
        noise.reset();
        noise
    }
}

impl ActionNoise for OrnsteinUhlenbeckActionNoise {
    fn sample(&mut self) -> Result<Vec<f32>> {
        let n = standard_normal(self.mu.len())?;
        let (theta, dt) = (self.theta, self.dt);
        for (((x, m), s), n) in self
            .x_prev
            .iter_mut()
            .zip(self.mu.iter())
            .zip(self.sigma.iter())
            .zip(n.iter())
        {
            *x += theta * (m - *x) * dt + s * dt.sqrt() * n;
        }
        Ok(self.x_prev.clone())
    }

    fn reset(&mut self) {
        self.x_prev = match &self.x0 {
            Some(x0) => x0.clone(),
            None => vec![0.; self.mu.len()],
        };
    }
}

/// Configuration of action noise.
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub enum ActionNoiseConfig {
    /// [`NormalActionNoise`] with zero mean.
    Normal {
        /// Standard deviation for every action dimension.
        sigma: f32,
    },

    /// [`OrnsteinUhlenbeckActionNoise`] reverting to zero.
    OrnsteinUhlenbeck {
        /// Scale of the diffusion for every action dimension.
        sigma: f32,
        #[serde(default = "default_theta")]
        theta: f32,
        #[serde(default = "default_dt")]
        dt: f32,
    },
}

fn default_theta() -> f32 {
    0.15
}

fn default_dt() -> f32 {
    1e-2
}

impl ActionNoiseConfig {
    /// Builds the noise for actions of dimension `act_dim`.
    pub fn build(&self, act_dim: usize) -> Box<dyn ActionNoise + Send> {
        let mu = vec![0.; act_dim];
        match self {
            Self::Normal { sigma } => Box::new(NormalActionNoise::new(mu, vec![*sigma; act_dim])),
            Self::OrnsteinUhlenbeck { sigma, theta, dt } => Box::new(
                OrnsteinUhlenbeckActionNoise::new(mu, vec![*sigma; act_dim], *theta, *dt, None),
            ),
        }
    }
}

/// Configuration of [`AdaptiveParamNoise`].
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct ParamNoiseConfig {
    /// Standard deviation of the first perturbation.
    pub initial_stddev: f64,

    /// Target RMS distance between clean and perturbed actions.
    pub desired_action_stddev: f64,

    /// Factor by which the standard deviation shrinks or grows per adaptation.
    pub adoption_coefficient: f64,
}

impl Default for ParamNoiseConfig {
    fn default() -> Self {
        Self {
            initial_stddev: 0.1,
            desired_action_stddev: 0.1,
            adoption_coefficient: 1.01,
        }
    }
}

impl ParamNoiseConfig {
    /// Sets the initial standard deviation.
    pub fn initial_stddev(mut self, v: f64) -> Self {
        self.initial_stddev = v;
        self
    }

    /// Sets the target action distance.
    pub fn desired_action_stddev(mut self, v: f64) -> Self {
        self.desired_action_stddev = v;
        self
    }

    /// Sets the adaptation factor.
    pub fn adoption_coefficient(mut self, v: f64) -> Self {
        self.adoption_coefficient = v;
        self
    }
}

/// Scale of parameter noise, adapted from measured policy distances.
#[derive(Debug, Clone)]
pub struct AdaptiveParamNoise {
    config: ParamNoiseConfig,
    current_stddev: f64,
}

impl AdaptiveParamNoise {
    /// Creates the state at the initial standard deviation.
    pub fn new(config: &ParamNoiseConfig) -> Self {
        Self {
            current_stddev: config.initial_stddev,
            config: config.clone(),
        }
    }

    /// Current standard deviation of the perturbation.
    pub fn current_stddev(&self) -> f64 {
        self.current_stddev
    }

    /// Shrinks the scale if `distance` exceeds the target, grows it otherwise.
    pub fn adapt(&mut self, distance: f64) {
        if distance > self.config.desired_action_stddev {
            self.current_stddev /= self.config.adoption_coefficient;
        } else {
            self.current_stddev *= self.config.adoption_coefficient;
        }
    }

    /// Returns `param_noise_stddev`.
    pub fn get_stats(&self) -> Record {
        Record::from_slice(&[(
            "param_noise_stddev",
            RecordValue::Scalar(self.current_stddev as f32),
        )])
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_adapt() {
        let mut noise = AdaptiveParamNoise::new(&ParamNoiseConfig::default());
        noise.adapt(0.5);
        assert!((noise.current_stddev() - 0.1 / 1.01).abs() < 1e-12);
        noise.adapt(0.0);
        noise.adapt(0.0);
        assert!((noise.current_stddev() - 0.1 * 1.01).abs() < 1e-12);
        assert!(noise.get_stats().get_scalar("param_noise_stddev").is_ok());
    }

    #[test]
    fn test_ou_reset() -> Result<()> {
        let mut noise =
            OrnsteinUhlenbeckActionNoise::new(vec![0.; 3], vec![0.2; 3], 0.15, 1e-2, None);
        let x = noise.sample()?;
        assert_eq!(x.len(), 3);
        noise.reset();
        assert_eq!(noise.x_prev, vec![0.; 3]);
        Ok(())
    }

    #[test]
    fn test_ou_reverts_to_mean_without_diffusion() -> Result<()> {
        let mut noise =
            OrnsteinUhlenbeckActionNoise::new(vec![0.; 1], vec![0.; 1], 0.15, 1.0, Some(vec![1.0]));
        let x = noise.sample()?;
        assert!((x[0] - 0.85).abs() < 1e-6);
        Ok(())
    }

    #[test]
    fn test_serde_action_noise_config() -> Result<()> {
        let config: ActionNoiseConfig =
            serde_yaml::from_str("OrnsteinUhlenbeck:\n  sigma: 0.2\n")?;
        assert_eq!(
            config,
            ActionNoiseConfig::OrnsteinUhlenbeck {
                sigma: 0.2,
                theta: 0.15,
                dt: 1e-2
            }
        );
        assert_eq!(config.build(2).sample()?.len(), 2);
        Ok(())
    }
}

//! Fixed-capacity replay memory with uniform sampling.
use super::{ReplayMemory, RingMemoryConfig, TransitionBatch, Transitions};
use crate::error::CoreError;
use anyhow::Result;
use log::{info, trace};
use rand::{rngs::StdRng, Rng, SeedableRng};

/// A ring buffer of transitions.
///
/// Writes wrap around once `capacity` transitions are stored. Sampling draws
/// indices uniformly with replacement from the stored transitions.
pub struct RingMemory {
    capacity: usize,
    obs_dim: usize,
    act_dim: usize,

    /// Next write position.
    i: usize,

    /// Number of stored transitions.
    size: usize,

    obs0: Vec<f32>,
    actions: Vec<f32>,
    rewards: Vec<f32>,
    obs1: Vec<f32>,
    terminals1: Vec<f32>,
    rng: StdRng,
}

impl RingMemory {
    /// Builds an empty memory.
    pub fn build(config: &RingMemoryConfig) -> Result<Self> {
        let capacity = config.capacity;
        if capacity == 0 {
            return Err(CoreError::ZeroCapacity.into());
        }
        info!(
            "ring memory: capacity {}, obs_dim {}, act_dim {}",
            capacity, config.obs_dim, config.act_dim
        );
        Ok(Self {
            capacity,
            obs_dim: config.obs_dim,
            act_dim: config.act_dim,
            i: 0,
            size: 0,
            obs0: vec![0.; capacity * config.obs_dim],
            actions: vec![0.; capacity * config.act_dim],
            rewards: vec![0.; capacity],
            obs1: vec![0.; capacity * config.obs_dim],
            terminals1: vec![0.; capacity],
            rng: StdRng::seed_from_u64(config.seed),
        })
    }

    fn check_dim(what: &str, expected: usize, actual: usize) -> Result<()> {
        if expected != actual {
            return Err(CoreError::DimensionMismatch {
                what: what.to_string(),
                expected,
                actual,
            }
            .into());
        }
        Ok(())
    }

    fn indices(&mut self, batch_size: usize) -> Result<Vec<usize>> {
        if self.size == 0 {
            return Err(CoreError::EmptyMemory {
                requested: batch_size,
            }
            .into());
        }
        Ok((0..batch_size)
            .map(|_| self.rng.gen_range(0..self.size))
            .collect())
    }

    fn gather(&self, ixs: &[usize]) -> Transitions {
        let (od, ad) = (self.obs_dim, self.act_dim);
        let rows = |src: &[f32], d: usize| -> Vec<f32> {
            ixs.iter()
                .flat_map(|&ix| src[ix * d..(ix + 1) * d].iter().copied())
                .collect()
        };

        Transitions {
            obs0: rows(&self.obs0, od),
            actions: rows(&self.actions, ad),
            rewards: ixs.iter().map(|&ix| self.rewards[ix]).collect(),
            obs1: rows(&self.obs1, od),
            terminals1: ixs.iter().map(|&ix| self.terminals1[ix]).collect(),
            obs_dim: od,
            act_dim: ad,
        }
    }
}

impl ReplayMemory for RingMemory {
    fn append(
        &mut self,
        obs0: &[f32],
        action: &[f32],
        reward: f32,
        obs1: &[f32],
        terminal: bool,
    ) -> Result<()> {
        Self::check_dim("obs0", self.obs_dim, obs0.len())?;
        Self::check_dim("action", self.act_dim, action.len())?;
        Self::check_dim("obs1", self.obs_dim, obs1.len())?;

        let (od, ad, i) = (self.obs_dim, self.act_dim, self.i);
        self.obs0[i * od..(i + 1) * od].copy_from_slice(obs0);
        self.actions[i * ad..(i + 1) * ad].copy_from_slice(action);
        self.rewards[i] = reward;
        self.obs1[i * od..(i + 1) * od].copy_from_slice(obs1);
        self.terminals1[i] = if terminal { 1.0 } else { 0.0 };

        self.i = (self.i + 1) % self.capacity;
        self.size = (self.size + 1).min(self.capacity);
        Ok(())
    }

    fn sample(&mut self, batch_size: usize) -> Result<TransitionBatch> {
        let ixs = self.indices(batch_size)?;
        Ok(TransitionBatch {
            primary: self.gather(&ixs),
            unrelated: None,
        })
    }

    fn sample_twice(&mut self, batch_size: usize) -> Result<TransitionBatch> {
        trace!("sample_twice({}) from {} transitions", batch_size, self.size);
        let ixs = self.indices(batch_size)?;
        let ixs100 = self.indices(batch_size)?;
        Ok(TransitionBatch {
            primary: self.gather(&ixs),
            unrelated: Some(self.gather(&ixs100)),
        })
    }

    fn len(&self) -> usize {
        self.size
    }
}

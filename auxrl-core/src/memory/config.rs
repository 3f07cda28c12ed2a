//! Configuration of [`RingMemory`](super::RingMemory).
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{
    default::Default,
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

/// Configuration of [`RingMemory`](super::RingMemory).
///
/// ```rust
/// use auxrl_core::memory::RingMemoryConfig;
///
/// let config = RingMemoryConfig::default()
///     .capacity(10_000)
///     .obs_dim(3)
///     .act_dim(1)
///     .seed(42);
/// ```
#[derive(Debug, Deserialize, Serialize, PartialEq, Clone)]
pub struct RingMemoryConfig {
    /// Maximum number of transitions. The oldest ones are overwritten when full.
    pub capacity: usize,

    /// Dimension of observations.
    pub obs_dim: usize,

    /// Dimension of actions.
    pub act_dim: usize,

    /// Random seed used for sampling.
    pub seed: u64,
}

impl Default for RingMemoryConfig {
    fn default() -> Self {
        Self {
            capacity: 1_000_000,
            obs_dim: 1,
            act_dim: 1,
            seed: 42,
        }
    }
}

impl RingMemoryConfig {
    /// Sets the capacity.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Sets the dimension of observations.
    pub fn obs_dim(mut self, obs_dim: usize) -> Self {
        self.obs_dim = obs_dim;
        self
    }

    /// Sets the dimension of actions.
    pub fn act_dim(mut self, act_dim: usize) -> Self {
        self.act_dim = act_dim;
        self
    }

    /// Sets the random seed.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Loads the configuration from a YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        Ok(b)
    }

    /// Saves the configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tempdir::TempDir;

    #[test]
    fn test_serde_ring_memory_config() -> Result<()> {
        let config = RingMemoryConfig::default().capacity(100).obs_dim(3).seed(7);
        let dir = TempDir::new("ring_memory_config")?;
        let path = dir.path().join("ring_memory_config.yaml");
        config.save(&path)?;
        let config_ = RingMemoryConfig::load(&path)?;
        assert_eq!(config, config_);
        Ok(())
    }
}

//! DDPG agent with auxiliary representation-learning losses, implemented with
//! [candle](https://crates.io/crates/candle-core).
//!
//! The actor and the critic each own a [`Representation`](model::Representation).
//! Besides the usual DDPG objectives, an [`AuxEngine`](auxiliary::AuxEngine)
//! shapes these representations with losses that encode invariances of the
//! environment (temporal coherence, proportionality, causality, repeatability)
//! and with a next-observation predictor. Every update is averaged over the
//! workers of a [`Communicator`](auxrl_core::comm::Communicator).
pub mod auxiliary;
pub mod ddpg;
pub mod error;
pub mod model;
pub mod noise;
pub mod opt;
pub mod util;
use anyhow::Result;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Copy, Deserialize, Serialize, PartialEq)]
/// Device for using candle.
///
/// This enum is added because [`candle_core::Device`] does not support serialization.
pub enum Device {
    /// The main CPU device.
    Cpu,

    /// The main GPU device.
    Cuda(usize),
}

impl Default for Device {
    fn default() -> Self {
        Self::Cpu
    }
}

impl Device {
    /// Returns the corresponding [`candle_core::Device`].
    pub fn to_candle(self) -> Result<candle_core::Device> {
        match self {
            Self::Cpu => Ok(candle_core::Device::Cpu),
            Self::Cuda(n) => Ok(candle_core::Device::new_cuda(n)?),
        }
    }
}

//! Replay memory.
//!
//! The agent only talks to memory through [`ReplayMemory`]: it appends single
//! transitions and samples batches, either a single draw ([`ReplayMemory::sample`])
//! or two independent draws ([`ReplayMemory::sample_twice`]) for losses that
//! compare a transition with an unrelated one.
mod batch;
mod config;
mod ring;

pub use batch::{TransitionBatch, Transitions};
pub use config::RingMemoryConfig;
pub use ring::RingMemory;

use anyhow::Result;

/// Interface of a replay memory.
pub trait ReplayMemory {
    /// Appends a transition.
    fn append(
        &mut self,
        obs0: &[f32],
        action: &[f32],
        reward: f32,
        obs1: &[f32],
        terminal: bool,
    ) -> Result<()>;

    /// Samples `batch_size` transitions uniformly with replacement.
    fn sample(&mut self, batch_size: usize) -> Result<TransitionBatch>;

    /// Samples a primary batch and an independent unrelated batch of the same size.
    fn sample_twice(&mut self, batch_size: usize) -> Result<TransitionBatch>;

    /// Number of stored transitions.
    fn len(&self) -> usize;

    /// Returns `true` if no transition is stored.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

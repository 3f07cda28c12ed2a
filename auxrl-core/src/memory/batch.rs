//! Batches of transitions.

/// Equal-length arrays of transitions, stored row-major.
#[derive(Clone, Debug, PartialEq)]
pub struct Transitions {
    /// Observations, `len * obs_dim` values.
    pub obs0: Vec<f32>,

    /// Actions, `len * act_dim` values.
    pub actions: Vec<f32>,

    /// Rewards, one per transition.
    pub rewards: Vec<f32>,

    /// Next observations, `len * obs_dim` values.
    pub obs1: Vec<f32>,

    /// `1.0` if the episode terminated at the next observation, `0.0` otherwise.
    pub terminals1: Vec<f32>,

    /// Dimension of observations.
    pub obs_dim: usize,

    /// Dimension of actions.
    pub act_dim: usize,
}

impl Transitions {
    /// Number of transitions.
    pub fn len(&self) -> usize {
        self.rewards.len()
    }

    /// Returns `true` if the set holds no transition.
    pub fn is_empty(&self) -> bool {
        self.rewards.is_empty()
    }
}

/// A batch sampled from a replay memory.
///
/// `unrelated` is filled only by [`sample_twice`](super::ReplayMemory::sample_twice).
/// Its fields are exposed as `obs100`, `actions100`, `rewards100` and `obs101`.
#[derive(Clone, Debug, PartialEq)]
pub struct TransitionBatch {
    /// The primary sample.
    pub primary: Transitions,

    /// The independently drawn sample.
    pub unrelated: Option<Transitions>,
}

impl TransitionBatch {
    /// Batch size.
    pub fn len(&self) -> usize {
        self.primary.len()
    }

    /// Returns `true` if the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.primary.is_empty()
    }

    /// Observations of the primary sample.
    pub fn obs0(&self) -> &[f32] {
        &self.primary.obs0
    }

    /// Actions of the primary sample.
    pub fn actions(&self) -> &[f32] {
        &self.primary.actions
    }

    /// Rewards of the primary sample.
    pub fn rewards(&self) -> &[f32] {
        &self.primary.rewards
    }

    /// Next observations of the primary sample.
    pub fn obs1(&self) -> &[f32] {
        &self.primary.obs1
    }

    /// Terminal flags of the primary sample.
    pub fn terminals1(&self) -> &[f32] {
        &self.primary.terminals1
    }

    /// Observations of the unrelated sample.
    pub fn obs100(&self) -> Option<&[f32]> {
        self.unrelated.as_ref().map(|t| t.obs0.as_slice())
    }

    /// Actions of the unrelated sample.
    pub fn actions100(&self) -> Option<&[f32]> {
        self.unrelated.as_ref().map(|t| t.actions.as_slice())
    }

    /// Rewards of the unrelated sample.
    pub fn rewards100(&self) -> Option<&[f32]> {
        self.unrelated.as_ref().map(|t| t.rewards.as_slice())
    }

    /// Next observations of the unrelated sample.
    pub fn obs101(&self) -> Option<&[f32]> {
        self.unrelated.as_ref().map(|t| t.obs1.as_slice())
    }

    /// Terminal flags of the unrelated sample.
    pub fn terminals101(&self) -> Option<&[f32]> {
        self.unrelated.as_ref().map(|t| t.terminals1.as_slice())
    }
}

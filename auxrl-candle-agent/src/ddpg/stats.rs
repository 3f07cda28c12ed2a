//! Losses returned by a training step.
use crate::auxiliary::AuxTask;
use auxrl_core::record::{Record, RecordValue};

/// Losses of one call of [`Ddpg::train`](super::Ddpg::train).
#[derive(Debug, Clone, PartialEq)]
pub struct TrainStats {
    /// Critic loss, including L2 regularization.
    pub critic_loss: f32,

    /// Actor loss, the negated mean action value.
    pub actor_loss: f32,

    /// Combined auxiliary loss, if auxiliary tasks are configured.
    pub aux_loss: Option<f32>,

    /// Weighted loss of each auxiliary task.
    pub aux_losses: Vec<(AuxTask, f32)>,
}

impl TrainStats {
    /// Converts the losses into a [`Record`].
    ///
    /// Keys are `loss_critic`, `loss_actor`, `aux_loss` and `aux_<task>`.
    pub fn to_record(&self) -> Record {
        let mut record = Record::from_slice(&[
            ("loss_critic", RecordValue::Scalar(self.critic_loss)),
            ("loss_actor", RecordValue::Scalar(self.actor_loss)),
        ]);
        if let Some(aux_loss) = self.aux_loss {
            record.insert("aux_loss", RecordValue::Scalar(aux_loss));
        }
        for (task, loss) in self.aux_losses.iter() {
            record.insert(format!("aux_{}", task), RecordValue::Scalar(*loss));
        }
        record
    }
}

#![warn(missing_docs)]
//! Backend-independent components of auxrl.
//!
//! * [`record`]: named metrics returned by the agent.
//! * [`memory`]: replay memory with single and dual sampling.
//! * [`comm`]: collective communication between synchronized workers.
//! * [`RunningMeanStd`]: normalization statistics kept consistent across workers.
pub mod comm;
pub mod error;
pub mod memory;
pub mod record;

mod running_mean_std;
pub use running_mean_std::RunningMeanStd;

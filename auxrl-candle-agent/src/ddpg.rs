//! DDPG agent with auxiliary losses.
mod base;
mod config;
mod stats;
pub use base::{Ddpg, TrainerState};
pub use config::DdpgConfig;
pub use stats::TrainStats;

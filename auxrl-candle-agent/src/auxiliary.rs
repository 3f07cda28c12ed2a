//! Auxiliary losses shaping the representations of the actor and the critic.
//!
//! Each task yields one loss per representation owner. The losses only reach
//! representation parameters (and predictor parameters for `predict`); the
//! output layers of the actor and the critic are never updated by them.
mod config;
mod engine;
pub mod tasks;
pub use config::{AuxApply, AuxConfig, AuxTask};
pub use engine::{AuxEngine, AuxInputs, AuxLosses};

//! Errors in the agent.
use thiserror::Error;

/// Errors raised while building or running the agent.
#[derive(Error, Debug)]
pub enum AgentError {
    /// An auxiliary task name that is not recognized.
    #[error("Unknown auxiliary task: {0}")]
    UnknownAuxTask(String),

    /// The same auxiliary task was configured twice.
    #[error("Duplicate auxiliary task: {0}")]
    DuplicateAuxTask(String),

    /// An active auxiliary task has no weight.
    #[error("Missing lambda for auxiliary task: {0}")]
    MissingAuxLambda(String),

    /// A network and its copy do not hold the same parameters.
    #[error("Parameter mismatch between {src} and {dest}: {detail}")]
    ParamMismatch {
        /// Name of the source parameter set.
        src: String,
        /// Name of the destination parameter set.
        dest: String,
        /// What differs.
        detail: String,
    },

    /// The critic output layer does not have the structure PopArt needs.
    #[error("PopArt requires a critic output layer with a (1, n) weight and a (1,) bias: {0}")]
    PopArtStructure(String),

    /// Action noise does not match the action dimension.
    #[error("Action noise has dimension {actual}, expected {expected}")]
    NoiseDimension {
        /// Action dimension.
        expected: usize,
        /// Length of the sampled noise.
        actual: usize,
    },

    /// An operation was called before [`Ddpg::initialize`](crate::ddpg::Ddpg::initialize).
    #[error("The agent is not initialized")]
    NotInitialized,

    /// A batch lacks a field required by an auxiliary task.
    #[error("Batch has no field {0}")]
    MissingBatchField(&'static str),

    /// Shared parameter storage could not be locked.
    #[error("Poisoned parameter storage of {0}")]
    PoisonedParams(String),
}

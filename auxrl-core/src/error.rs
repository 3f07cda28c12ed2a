//! Errors in the library.
use thiserror::Error;

/// Errors raised by the core components.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Record key error.
    #[error("Record key error: {0}")]
    RecordKeyError(String),

    /// The memory cannot serve a batch yet.
    #[error("Memory has no transitions to sample (requested {requested})")]
    EmptyMemory {
        /// Requested batch size.
        requested: usize,
    },

    /// A replay memory was configured to hold no transitions.
    #[error("Memory capacity must be positive")]
    ZeroCapacity,

    /// A vector given to a component does not have the expected length.
    #[error("Dimension mismatch in {what}: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Name of the offending field.
        what: String,
        /// Expected length.
        expected: usize,
        /// Given length.
        actual: usize,
    },

    /// Failure inside a collective operation.
    #[error("Communicator error: {0}")]
    CommError(String),
}

//! Errors of run aggregation.
use thiserror::Error;

/// Errors raised while reading or summarizing runs.
#[derive(Debug, Error)]
pub enum StatsError {
    /// A required column is absent from a progress file.
    #[error("column {column:?} not found in {path}")]
    MissingColumn {
        /// Progress file.
        path: String,
        /// Name of the column.
        column: String,
    },

    /// No run directory contains the keyword.
    #[error("no run matching {keyword:?} in {dir}")]
    NoRuns {
        /// Keyword selecting runs.
        keyword: String,
        /// Directory searched.
        dir: String,
    },

    /// The confidence level is outside `(0, 1)`.
    #[error("confidence must be in (0, 1), got {0}")]
    InvalidConfidence(f64),
}

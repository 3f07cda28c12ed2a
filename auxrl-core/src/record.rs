//! Types for recording training metrics.
//!
//! A [`Record`] is a flat map from names to [`RecordValue`]s. The agent returns
//! one from its statistics query, and callers merge records from several
//! sources before handing them to whatever logging they use.
//!
//! ```rust
//! use auxrl_core::record::{Record, RecordValue};
//!
//! let mut record = Record::from_scalar("loss_critic", 0.5);
//! record.merge_inplace(Record::from_slice(&[("loss_actor", RecordValue::Scalar(-1.0))]));
//! assert_eq!(record.get_scalar("loss_critic").unwrap(), 0.5);
//! assert_eq!(record.len(), 2);
//! ```
mod base;

pub use base::{Record, RecordValue};

//! Queue-level error type.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// A configuration value was out of range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

//! Node-level error type.

use thiserror::Error;

/// Errors returned by a node's `execute` method.
///
/// The engine never retries or rewrites these: the first handler error fails
/// the containing execution and is recorded verbatim against the node.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// The node's configuration is missing a field or holds the wrong type.
    #[error("invalid node config: {0}")]
    InvalidConfig(String),

    /// The handler ran and reported a failure.
    #[error("{0}")]
    Failed(String),
}

impl NodeError {
    /// Shorthand for [`NodeError::Failed`].
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

//! Engine-level error types.

use thiserror::Error;
use uuid::Uuid;

use nodes::NodeError;
use queue::QueueError;

/// A structural problem found by [`validate`](crate::dag::validate).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Two or more nodes share the same ID. Reported once per ID.
    #[error("duplicate node ID: '{0}'")]
    DuplicateNodeId(String),

    /// An edge references a node ID that doesn't exist in the workflow.
    #[error("edge '{edge_id}' references unknown node '{node_id}' ({side} side)")]
    UnknownNodeReference {
        edge_id: String,
        node_id: String,
        side: &'static str,
    },

    /// Depth-first traversal found an edge back into the current path.
    #[error("workflow graph contains a cycle (edge '{from}' -> '{to}' closes it)")]
    CycleDetected { from: String, to: String },
}

/// Errors produced by the workflow engine (validation + execution).
#[derive(Debug, Error)]
pub enum EngineError {
    // ------ Validation errors ------

    /// The workflow was rejected before scheduling; every problem is listed.
    #[error("workflow failed validation: {}", join(.0))]
    Validation(Vec<ValidationError>),

    // ------ Execution errors ------

    /// No handler is registered for the node's type.
    #[error("node '{node_id}' has unknown node type '{node_type}'")]
    UnknownNodeType {
        node_id: String,
        node_type: String,
    },

    /// The node's handler reported a failure.
    #[error("node '{node_id}' failed: {source}")]
    Handler {
        node_id: String,
        #[source]
        source: NodeError,
    },

    /// The node's handler panicked instead of returning.
    #[error("node '{node_id}' handler panicked: {message}")]
    HandlerPanicked {
        node_id: String,
        message: String,
    },

    /// The requested transition is not allowed from the current state.
    #[error("cannot {action} {subject} while it is {state}")]
    InvalidStateTransition {
        subject: String,
        state: String,
        action: &'static str,
    },

    #[error("execution {0} not found")]
    ExecutionNotFound(Uuid),

    /// The scheduler could not order every node; the graph bypassed validation.
    #[error("schedule covers {scheduled} of {total} nodes; graph is not acyclic")]
    IncompleteSchedule { scheduled: usize, total: usize },

    /// Invalid run-queue argument (e.g. a concurrency limit of 0).
    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl EngineError {
    /// The node this error is attributed to, if any.
    pub fn node_id(&self) -> Option<&str> {
        match self {
            Self::UnknownNodeType { node_id, .. }
            | Self::Handler { node_id, .. }
            | Self::HandlerPanicked { node_id, .. } => Some(node_id.as_str()),
            _ => None,
        }
    }
}

fn join(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

//! `engine` crate — workflow graph validation, scheduling and execution.
//!
//! Data flows: [`Engine::submit`] validates and queues a workflow; the run
//! queue admits it when capacity allows; the [`WorkflowExecutor`] computes
//! the node order and dispatches handlers one at a time; the
//! [`ExecutionTracker`] records every transition and publishes it on the
//! [`EventBus`]; the queue slot is freed once the run is terminal.

pub mod dag;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod executor;
pub mod models;
pub mod runtime;
pub mod scheduler;
pub mod tracker;

pub use dag::{adjacency, validate};
pub use dispatcher::NodeDispatcher;
pub use error::{EngineError, ValidationError};
pub use events::{EngineEvent, EventBus, EventReceiver};
pub use executor::WorkflowExecutor;
pub use models::{
    Edge, Execution, ExecutionError, ExecutionStatus, NodeDefinition, NodeResult, NodeStatus,
    Workflow,
};
pub use runtime::{Engine, EngineConfig};
pub use scheduler::compute_order;
pub use tracker::ExecutionTracker;

//! Workflow execution loop.
//!
//! `WorkflowExecutor` drives one run from `pending` to a terminal state:
//! 1. Moves the execution to `running` (a run cancelled while queued stops here).
//! 2. Computes the topological order once.
//! 3. Dispatches nodes strictly one at a time in that order, recording each
//!    start and outcome in the tracker.
//! 4. Halts on the first node failure (the whole run fails) or when the run
//!    has been cancelled between two nodes.
//!
//! Engine-internal errors fail the run, never the process.

use std::collections::HashMap;

use tracing::{debug, error, info, instrument, warn};

use crate::dispatcher::NodeDispatcher;
use crate::models::{ExecutionError, ExecutionStatus, NodeDefinition, Workflow};
use crate::scheduler::compute_order;
use crate::tracker::ExecutionTracker;
use crate::EngineError;

/// Stateless orchestrator that runs a single workflow execution.
#[derive(Debug, Clone)]
pub struct WorkflowExecutor {
    dispatcher: NodeDispatcher,
}

impl WorkflowExecutor {
    pub fn new(dispatcher: NodeDispatcher) -> Self {
        Self { dispatcher }
    }

    /// Run `workflow` against `tracker` until it reaches a terminal state and
    /// return that state. The workflow must already be validated.
    #[instrument(skip_all, fields(execution_id = %tracker.id(), workflow_id = %workflow.id))]
    pub async fn run(&self, workflow: &Workflow, tracker: &ExecutionTracker) -> ExecutionStatus {
        if let Err(e) = tracker.start() {
            debug!("not starting: {}", e);
            return tracker.status();
        }
        info!("execution started ({} nodes)", workflow.nodes.len());

        match self.execute_nodes(workflow, tracker).await {
            Ok(()) => match tracker.complete() {
                Ok(()) => info!("execution completed"),
                Err(_) => info!("execution ended as {}", tracker.status()),
            },
            Err(err) => {
                error!("execution failed: {}", err);
                let failure = ExecutionError {
                    node_id: err.node_id().map(str::to_owned),
                    message: err.to_string(),
                };
                if let Err(e) = tracker.fail(failure) {
                    warn!("could not record failure: {}", e);
                }
            }
        }

        tracker.status()
    }

    async fn execute_nodes(
        &self,
        workflow: &Workflow,
        tracker: &ExecutionTracker,
    ) -> Result<(), EngineError> {
        let order = compute_order(workflow)?;
        debug!("execution order: {:?}", order);

        let node_map: HashMap<&str, &NodeDefinition> =
            workflow.nodes.iter().map(|n| (n.id.as_str(), n)).collect();

        for node_id in &order {
            if tracker.is_terminal() {
                info!("execution {}; not dispatching '{}'", tracker.status(), node_id);
                return Ok(());
            }
            let Some(node) = node_map.get(node_id.as_str()) else {
                continue;
            };

            if let Err(e) = tracker.start_node(node_id) {
                return stop_if_terminal(tracker, e);
            }

            let snapshot = tracker.snapshot();
            match self.dispatcher.dispatch(workflow, node, &snapshot).await {
                Ok(output) => {
                    if let Err(e) = tracker.complete_node(node_id, output) {
                        return stop_if_terminal(tracker, e);
                    }
                    info!("node '{}' completed", node_id);
                }
                Err(err) => {
                    let message = match &err {
                        EngineError::Handler { source, .. } => source.to_string(),
                        other => other.to_string(),
                    };
                    if let Err(e) = tracker.fail_node(node_id, message) {
                        return stop_if_terminal(tracker, e);
                    }
                    return Err(err);
                }
            }
        }

        Ok(())
    }
}

/// A rejected transition after cancellation is expected; anything else is
/// an engine bug and fails the run.
fn stop_if_terminal(tracker: &ExecutionTracker, err: EngineError) -> Result<(), EngineError> {
    if tracker.is_terminal() {
        Ok(())
    } else {
        Err(err)
    }
}

//! Execution State Tracker — the single source of truth for one run.
//!
//! Every operation validates the transition, mutates the [`Execution`] and
//! publishes the matching [`EngineEvent`] under one lock, so observers see
//! events in the same order the state changed. Readers get cloned
//! snapshots, never a reference into live state.

use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::events::{EngineEvent, EventBus};
use crate::models::{Execution, ExecutionError, ExecutionStatus, NodeResult, NodeStatus};
use crate::EngineError;

pub struct ExecutionTracker {
    id: Uuid,
    workflow_id: Uuid,
    state: Mutex<Execution>,
    events: EventBus,
    status_tx: watch::Sender<ExecutionStatus>,
}

impl ExecutionTracker {
    /// Take ownership of a freshly created (pending) execution.
    pub fn new(execution: Execution, events: EventBus) -> Self {
        let (status_tx, _) = watch::channel(execution.status);
        Self {
            id: execution.id,
            workflow_id: execution.workflow_id,
            state: Mutex::new(execution),
            events,
            status_tx,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn workflow_id(&self) -> Uuid {
        self.workflow_id
    }

    pub fn status(&self) -> ExecutionStatus {
        self.lock().status
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }

    /// Immutable copy of the current state.
    pub fn snapshot(&self) -> Execution {
        self.lock().clone()
    }

    /// Wait until the run reaches a terminal state, then return a snapshot.
    pub async fn wait(&self) -> Execution {
        let mut rx = self.status_tx.subscribe();
        // The sender lives as long as `self`, so `changed` cannot fail here.
        while !rx.borrow_and_update().is_terminal() {
            if rx.changed().await.is_err() {
                break;
            }
        }
        self.snapshot()
    }

    // -----------------------------------------------------------------------
    // Execution transitions
    // -----------------------------------------------------------------------

    /// `pending -> running`.
    pub fn start(&self) -> Result<(), EngineError> {
        let mut exec = self.lock();
        if exec.status != ExecutionStatus::Pending {
            return Err(self.rejected(exec.status, "start"));
        }
        let now = Utc::now();
        exec.status = ExecutionStatus::Running;
        exec.started_at = now;
        self.events.publish(EngineEvent::ExecutionStarted {
            execution_id: self.id,
            workflow_id: self.workflow_id,
            timestamp: now,
        });
        self.status_tx.send_replace(ExecutionStatus::Running);
        Ok(())
    }

    /// `running -> completed`.
    pub fn complete(&self) -> Result<(), EngineError> {
        let mut exec = self.lock();
        if exec.status != ExecutionStatus::Running {
            return Err(self.rejected(exec.status, "complete"));
        }
        let now = Self::finish(&mut exec, ExecutionStatus::Completed);
        self.events.publish(EngineEvent::ExecutionCompleted {
            execution_id: self.id,
            workflow_id: self.workflow_id,
            timestamp: now,
        });
        self.status_tx.send_replace(ExecutionStatus::Completed);
        Ok(())
    }

    /// `pending|running -> failed`. A pending run can only fail on an
    /// engine-internal error raised before its first node.
    pub fn fail(&self, error: ExecutionError) -> Result<(), EngineError> {
        let mut exec = self.lock();
        if exec.status.is_terminal() {
            return Err(self.rejected(exec.status, "fail"));
        }
        let now = Self::finish(&mut exec, ExecutionStatus::Failed);
        exec.error = Some(error.clone());
        self.events.publish(EngineEvent::ExecutionFailed {
            execution_id: self.id,
            workflow_id: self.workflow_id,
            node_id: error.node_id,
            error: error.message,
            timestamp: now,
        });
        self.status_tx.send_replace(ExecutionStatus::Failed);
        Ok(())
    }

    /// `pending|running -> cancelled`. A handler already in flight is not
    /// interrupted; its late result is discarded.
    pub fn cancel(&self) -> Result<(), EngineError> {
        let mut exec = self.lock();
        if exec.status.is_terminal() {
            return Err(self.rejected(exec.status, "cancel"));
        }
        let now = Self::finish(&mut exec, ExecutionStatus::Cancelled);
        self.events.publish(EngineEvent::ExecutionCancelled {
            execution_id: self.id,
            workflow_id: self.workflow_id,
            timestamp: now,
        });
        self.status_tx.send_replace(ExecutionStatus::Cancelled);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Node transitions
    // -----------------------------------------------------------------------

    /// Create the node's result in `running`.
    pub fn start_node(&self, node_id: &str) -> Result<(), EngineError> {
        let mut exec = self.lock();
        self.accepts_node_updates(&exec, node_id, "start")?;
        if let Some(existing) = exec.node_results.get(node_id) {
            if existing.status != NodeStatus::Pending {
                return Err(node_rejected(node_id, existing.status, "start"));
            }
        }
        let now = Utc::now();
        exec.node_results.insert(node_id.to_owned(), NodeResult::started(now));
        debug!("execution {}: node '{}' started", self.id, node_id);
        self.events.publish(EngineEvent::NodeStarted {
            execution_id: self.id,
            node_id: node_id.to_owned(),
            timestamp: now,
        });
        Ok(())
    }

    /// `running -> completed` for one node, recording its output.
    pub fn complete_node(&self, node_id: &str, output: Value) -> Result<(), EngineError> {
        let mut exec = self.lock();
        self.accepts_node_updates(&exec, node_id, "complete")?;
        let result = running_node(&mut exec, node_id, "complete")?;
        let now = Utc::now();
        result.status = NodeStatus::Completed;
        result.completed_at = Some(now);
        result.output = Some(output.clone());
        debug!("execution {}: node '{}' completed", self.id, node_id);
        self.events.publish(EngineEvent::NodeCompleted {
            execution_id: self.id,
            node_id: node_id.to_owned(),
            output,
            timestamp: now,
        });
        Ok(())
    }

    /// `running -> failed` for one node, recording the error message.
    pub fn fail_node(&self, node_id: &str, error: impl Into<String>) -> Result<(), EngineError> {
        let error = error.into();
        let mut exec = self.lock();
        self.accepts_node_updates(&exec, node_id, "fail")?;
        let result = running_node(&mut exec, node_id, "fail")?;
        let now = Utc::now();
        result.status = NodeStatus::Failed;
        result.completed_at = Some(now);
        result.error = Some(error.clone());
        debug!("execution {}: node '{}' failed: {}", self.id, node_id, error);
        self.events.publish(EngineEvent::NodeFailed {
            execution_id: self.id,
            node_id: node_id.to_owned(),
            error,
            timestamp: now,
        });
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn lock(&self) -> MutexGuard<'_, Execution> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn finish(exec: &mut Execution, status: ExecutionStatus) -> chrono::DateTime<Utc> {
        let now = Utc::now();
        exec.status = status;
        exec.completed_at = Some(now);
        now
    }

    /// Node updates are only accepted while the run is `running`; late
    /// results after a terminal transition are dropped with a warning.
    fn accepts_node_updates(
        &self,
        exec: &Execution,
        node_id: &str,
        action: &'static str,
    ) -> Result<(), EngineError> {
        if exec.status == ExecutionStatus::Running {
            return Ok(());
        }
        if exec.status.is_terminal() {
            warn!(
                "execution {} is {}; discarding late '{}' for node '{}'",
                self.id, exec.status, action, node_id
            );
        }
        Err(self.rejected(exec.status, action))
    }

    fn rejected(&self, state: ExecutionStatus, action: &'static str) -> EngineError {
        EngineError::InvalidStateTransition {
            subject: format!("execution {}", self.id),
            state: state.to_string(),
            action,
        }
    }
}

fn running_node<'a>(
    exec: &'a mut Execution,
    node_id: &str,
    action: &'static str,
) -> Result<&'a mut NodeResult, EngineError> {
    match exec.node_results.get_mut(node_id) {
        Some(result) if result.status == NodeStatus::Running => Ok(result),
        Some(result) => Err(node_rejected(node_id, result.status, action)),
        None => Err(node_rejected(node_id, NodeStatus::Pending, action)),
    }
}

fn node_rejected(node_id: &str, state: NodeStatus, action: &'static str) -> EngineError {
    EngineError::InvalidStateTransition {
        subject: format!("node '{node_id}'"),
        state: state.to_string(),
        action,
    }
}

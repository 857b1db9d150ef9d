//! The `Engine` service object — the contract collaborators program against.
//!
//! An `Engine` owns its handler registry, event bus, run queue and the
//! trackers of every execution it has accepted. Nothing is process-global:
//! construct as many engines as needed, e.g. one per test.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use nodes::HandlerRegistry;
use queue::{QueueConfig, QueueStatus, RunHandler, RunQueue, RunQueueItem};

use crate::dag::validate;
use crate::dispatcher::{panic_message, NodeDispatcher};
use crate::events::{EngineEvent, EventBus, EventReceiver};
use crate::executor::WorkflowExecutor;
use crate::models::{Execution, ExecutionError, NodeResult, NodeStatus, Workflow};
use crate::tracker::ExecutionTracker;
use crate::EngineError;

/// Tuning knobs for the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum number of executions running at once.
    pub concurrency_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: queue::DEFAULT_CONCURRENCY_LIMIT,
        }
    }
}

/// A submitted run: the workflow copy it executes and its state tracker.
#[derive(Clone)]
struct Run {
    workflow: Arc<Workflow>,
    tracker: Arc<ExecutionTracker>,
}

#[derive(Default)]
struct RunTable {
    runs: Mutex<HashMap<Uuid, Run>>,
}

impl RunTable {
    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, Run>> {
        self.runs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn get(&self, execution_id: Uuid) -> Option<Run> {
        self.lock().get(&execution_id).cloned()
    }
}

/// Bridges queue admission to the executor.
struct AdmittedRuns {
    runs: Arc<RunTable>,
    executor: WorkflowExecutor,
}

#[async_trait]
impl RunHandler for AdmittedRuns {
    async fn run(&self, item: RunQueueItem) {
        let Some(run) = self.runs.get(item.execution_id) else {
            warn!("admitted unknown execution {}", item.execution_id);
            return;
        };
        let status = match AssertUnwindSafe(self.executor.run(&run.workflow, &run.tracker))
            .catch_unwind()
            .await
        {
            Ok(status) => status,
            Err(payload) => {
                abandon(&run.tracker, &panic_message(payload.as_ref()));
                run.tracker.status()
            }
        };
        info!(
            "execution {} finished as {} after {} in queue and run",
            item.execution_id,
            status,
            chrono::Utc::now() - item.queued_at
        );
    }
}

/// Force a run whose executor panicked into `failed`, blaming the node that
/// was in flight.
pub(crate) fn abandon(tracker: &ExecutionTracker, message: &str) {
    error!("executor for execution {} panicked: {}", tracker.id(), message);
    let running = tracker
        .snapshot()
        .node_results
        .into_iter()
        .find(|(_, result)| result.status == NodeStatus::Running)
        .map(|(node_id, _)| node_id);
    if let Some(node_id) = &running {
        let _ = tracker.fail_node(node_id, format!("executor panicked: {message}"));
    }
    let failure = ExecutionError {
        node_id: running,
        message: format!("executor panicked: {message}"),
    };
    if let Err(e) = tracker.fail(failure) {
        warn!("could not record executor panic: {}", e);
    }
}

pub struct Engine {
    runs: Arc<RunTable>,
    queue: RunQueue,
    events: EventBus,
    registry: Arc<HandlerRegistry>,
}

impl Engine {
    /// Create an engine that dispatches through `registry`.
    ///
    /// Admitted runs are spawned on the ambient tokio runtime, so `submit`
    /// and `set_concurrency_limit` must be called from within one.
    ///
    /// # Errors
    /// [`EngineError::Queue`] if `config.concurrency_limit` is 0.
    pub fn new(config: EngineConfig, registry: HandlerRegistry) -> Result<Self, EngineError> {
        let registry = Arc::new(registry);
        let runs = Arc::new(RunTable::default());
        let handler = AdmittedRuns {
            runs: Arc::clone(&runs),
            executor: WorkflowExecutor::new(NodeDispatcher::new(Arc::clone(&registry))),
        };
        let queue = RunQueue::new(
            QueueConfig {
                concurrency_limit: config.concurrency_limit,
            },
            Arc::new(handler),
        )?;

        info!(
            "engine initialized (concurrency_limit={}, node_types={:?})",
            config.concurrency_limit,
            registry.node_types()
        );

        Ok(Self {
            runs,
            queue,
            events: EventBus::new(),
            registry,
        })
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Run the same structural checks `submit` applies, without submitting.
    pub fn validate(&self, workflow: &Workflow) -> Result<(), EngineError> {
        validate(workflow).map_err(EngineError::Validation)
    }

    /// Validate, snapshot and queue `workflow`; returns the new execution id
    /// without waiting for admission.
    ///
    /// Must run inside a tokio runtime. Outside one the run stays queued
    /// until the next admission attempt made from within a runtime.
    ///
    /// # Errors
    /// [`EngineError::Validation`] with every structural problem found.
    pub fn submit(&self, workflow: &Workflow) -> Result<Uuid, EngineError> {
        self.validate(workflow)?;

        // Later edits to the caller's definition must not reach this run.
        let workflow = Arc::new(workflow.clone());
        let execution = Execution::new(workflow.id);
        let execution_id = execution.id;
        let tracker = Arc::new(ExecutionTracker::new(execution, self.events.clone()));

        self.runs.lock().insert(
            execution_id,
            Run {
                workflow: Arc::clone(&workflow),
                tracker,
            },
        );
        self.events.publish(EngineEvent::ExecutionQueued {
            execution_id,
            workflow_id: workflow.id,
            timestamp: chrono::Utc::now(),
        });
        self.queue.enqueue(workflow.id, execution_id);

        Ok(execution_id)
    }

    /// Cancel a pending or running execution. Returns `false` if the id is
    /// unknown.
    ///
    /// # Errors
    /// [`EngineError::InvalidStateTransition`] if it already finished.
    pub fn cancel(&self, execution_id: Uuid) -> Result<bool, EngineError> {
        let Some(run) = self.runs.get(execution_id) else {
            return Ok(false);
        };
        run.tracker.cancel()?;
        if self.queue.remove(execution_id) {
            info!("execution {} cancelled before admission", execution_id);
        } else {
            info!("execution {} cancelled", execution_id);
        }
        Ok(true)
    }

    /// Snapshot of one execution.
    pub fn get_execution(&self, execution_id: Uuid) -> Result<Execution, EngineError> {
        self.runs
            .get(execution_id)
            .map(|run| run.tracker.snapshot())
            .ok_or(EngineError::ExecutionNotFound(execution_id))
    }

    /// Snapshots of every pending or running execution, oldest first.
    pub fn get_active_executions(&self) -> Vec<Execution> {
        self.collect(|exec| !exec.is_terminal())
    }

    /// Snapshots of every execution of one workflow, oldest first.
    pub fn list_executions(&self, workflow_id: Uuid) -> Vec<Execution> {
        self.collect(|exec| exec.workflow_id == workflow_id)
    }

    /// Result of one node in one execution, `None` if it has not started.
    pub fn node_result(
        &self,
        execution_id: Uuid,
        node_id: &str,
    ) -> Result<Option<NodeResult>, EngineError> {
        Ok(self.get_execution(execution_id)?.node_results.remove(node_id))
    }

    /// Wait for the execution to reach a terminal state.
    pub async fn wait(&self, execution_id: Uuid) -> Result<Execution, EngineError> {
        let run = self
            .runs
            .get(execution_id)
            .ok_or(EngineError::ExecutionNotFound(execution_id))?;
        Ok(run.tracker.wait().await)
    }

    pub fn queue_status(&self) -> QueueStatus {
        self.queue.status()
    }

    /// Change the concurrency limit for future admissions.
    ///
    /// # Errors
    /// [`EngineError::Queue`] if `limit` is 0.
    pub fn set_concurrency_limit(&self, limit: usize) -> Result<(), EngineError> {
        Ok(self.queue.set_concurrency_limit(limit)?)
    }

    /// Forget every finished execution; returns how many were dropped.
    /// Their ids resolve to [`EngineError::ExecutionNotFound`] afterwards.
    pub fn prune_finished(&self) -> usize {
        let trackers: Vec<(Uuid, Arc<ExecutionTracker>)> = self
            .runs
            .lock()
            .iter()
            .map(|(id, run)| (*id, Arc::clone(&run.tracker)))
            .collect();
        let finished: Vec<Uuid> = trackers
            .into_iter()
            .filter(|(_, tracker)| tracker.is_terminal())
            .map(|(id, _)| id)
            .collect();
        let mut runs = self.runs.lock();
        for id in &finished {
            runs.remove(id);
        }
        if !finished.is_empty() {
            info!("pruned {} finished execution(s)", finished.len());
        }
        finished.len()
    }

    /// Receive every lifecycle event emitted from now on.
    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    fn collect(&self, keep: impl Fn(&Execution) -> bool) -> Vec<Execution> {
        let trackers: Vec<Arc<ExecutionTracker>> = self
            .runs
            .lock()
            .values()
            .map(|run| Arc::clone(&run.tracker))
            .collect();
        let mut executions: Vec<Execution> = trackers
            .iter()
            .map(|t| t.snapshot())
            .filter(|exec| keep(exec))
            .collect();
        executions.sort_by_key(|exec| exec.started_at);
        executions
    }
}

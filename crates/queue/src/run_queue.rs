//! Concurrency-bounded run queue.
//!
//! Items are admitted in FIFO order while fewer than `concurrency_limit`
//! runs are active. Each admitted item is handed to the [`RunHandler`] on its
//! own tokio task; the slot is released when that task ends, so capacity
//! tracks real run completion rather than elapsed time.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{QueueConfig, QueueError, QueueStatus, RunQueueItem};

/// Executes an admitted run to completion.
///
/// `run` must only return once the run has reached a terminal state; the
/// queue frees the slot as soon as it does.
#[async_trait]
pub trait RunHandler: Send + Sync + 'static {
    async fn run(&self, item: RunQueueItem);
}

/// Admission queue shared by cloning; all clones drive the same state.
#[derive(Clone)]
pub struct RunQueue {
    inner: Arc<Inner>,
}

struct Inner {
    state: Mutex<QueueState>,
    handler: Arc<dyn RunHandler>,
}

struct QueueState {
    pending: VecDeque<RunQueueItem>,
    active: HashSet<Uuid>,
    concurrency_limit: usize,
}

impl RunQueue {
    /// Create a queue that hands admitted items to `handler`.
    ///
    /// # Errors
    /// [`QueueError::InvalidArgument`] if `config.concurrency_limit` is 0.
    pub fn new(config: QueueConfig, handler: Arc<dyn RunHandler>) -> Result<Self, QueueError> {
        check_limit(config.concurrency_limit)?;
        Ok(Self {
            inner: Arc::new(Inner {
                state: Mutex::new(QueueState {
                    pending: VecDeque::new(),
                    active: HashSet::new(),
                    concurrency_limit: config.concurrency_limit,
                }),
                handler,
            }),
        })
    }

    /// Append a run and return immediately; admission happens in the
    /// background as soon as capacity allows.
    ///
    /// Admitted runs are spawned on the current tokio runtime. Called outside
    /// one, the item stays pending until a later admission attempt made from
    /// within a runtime.
    pub fn enqueue(&self, workflow_id: Uuid, execution_id: Uuid) -> RunQueueItem {
        let item = RunQueueItem {
            workflow_id,
            execution_id,
            queued_at: Utc::now(),
        };
        {
            let mut state = self.inner.lock();
            state.pending.push_back(item.clone());
            info!(
                "execution {} of workflow {} queued (position {})",
                execution_id,
                workflow_id,
                state.pending.len()
            );
        }
        self.inner.admit();
        item
    }

    /// Drop a run that has not been admitted yet. Returns `false` if it is
    /// unknown or already running.
    pub fn remove(&self, execution_id: Uuid) -> bool {
        let mut state = self.inner.lock();
        let before = state.pending.len();
        state.pending.retain(|item| item.execution_id != execution_id);
        let removed = state.pending.len() != before;
        if removed {
            debug!("execution {} removed from queue", execution_id);
        }
        removed
    }

    /// Whether the run currently holds a slot.
    pub fn is_active(&self, execution_id: Uuid) -> bool {
        self.inner.lock().active.contains(&execution_id)
    }

    pub fn status(&self) -> QueueStatus {
        let state = self.inner.lock();
        QueueStatus {
            queue_length: state.pending.len(),
            active_count: state.active.len(),
            concurrency_limit: state.concurrency_limit,
        }
    }

    /// Change the limit for future admissions. Runs already active keep
    /// their slot even if they now exceed the limit.
    ///
    /// # Errors
    /// [`QueueError::InvalidArgument`] if `limit` is 0.
    pub fn set_concurrency_limit(&self, limit: usize) -> Result<(), QueueError> {
        check_limit(limit)?;
        {
            let mut state = self.inner.lock();
            info!(
                "concurrency limit changed from {} to {}",
                state.concurrency_limit, limit
            );
            state.concurrency_limit = limit;
        }
        self.inner.admit();
        Ok(())
    }
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move as many pending items into active slots as the limit allows and
    /// start each on its own task.
    fn admit(self: &Arc<Self>) {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!("no tokio runtime available; queued runs stay pending");
                return;
            }
        };

        let admitted: Vec<RunQueueItem> = {
            let mut state = self.lock();
            let mut admitted = Vec::new();
            while state.active.len() < state.concurrency_limit {
                let Some(item) = state.pending.pop_front() else {
                    break;
                };
                state.active.insert(item.execution_id);
                admitted.push(item);
            }
            admitted
        };

        for item in admitted {
            debug!("admitting execution {}", item.execution_id);
            let slot = Slot {
                inner: Arc::clone(self),
                execution_id: item.execution_id,
            };
            runtime.spawn(async move {
                let handler = Arc::clone(&slot.inner.handler);
                handler.run(item).await;
                drop(slot);
            });
        }
    }
}

/// Releases its slot on drop, so a panicking handler still frees capacity.
struct Slot {
    inner: Arc<Inner>,
    execution_id: Uuid,
}

impl Drop for Slot {
    fn drop(&mut self) {
        {
            let mut state = self.inner.lock();
            state.active.remove(&self.execution_id);
        }
        debug!("slot released by execution {}", self.execution_id);
        self.inner.admit();
    }
}

fn check_limit(limit: usize) -> Result<(), QueueError> {
    if limit < 1 {
        return Err(QueueError::InvalidArgument(
            "concurrency limit must be at least 1".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DEFAULT_CONCURRENCY_LIMIT;
    use std::collections::HashMap;
    use std::time::Duration;
    use tokio::sync::oneshot;

    /// Handler whose runs finish only when the test says so.
    #[derive(Default)]
    struct ManualHandler {
        started: Mutex<Vec<Uuid>>,
        finishers: Mutex<HashMap<Uuid, oneshot::Sender<()>>>,
        waiters: Mutex<HashMap<Uuid, oneshot::Receiver<()>>>,
    }

    impl ManualHandler {
        fn prepare(&self, id: Uuid) {
            let (tx, rx) = oneshot::channel();
            self.finishers.lock().unwrap().insert(id, tx);
            self.waiters.lock().unwrap().insert(id, rx);
        }

        fn finish(&self, id: Uuid) {
            let tx = self.finishers.lock().unwrap().remove(&id).unwrap();
            tx.send(()).unwrap();
        }

        fn started(&self) -> Vec<Uuid> {
            self.started.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl RunHandler for ManualHandler {
        async fn run(&self, item: RunQueueItem) {
            self.started.lock().unwrap().push(item.execution_id);
            let rx = self.waiters.lock().unwrap().remove(&item.execution_id);
            if let Some(rx) = rx {
                let _ = rx.await;
            }
        }
    }

    struct PanickingHandler;

    #[async_trait]
    impl RunHandler for PanickingHandler {
        async fn run(&self, _item: RunQueueItem) {
            panic!("handler blew up");
        }
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    fn queue_with(limit: usize, handler: Arc<dyn RunHandler>) -> RunQueue {
        RunQueue::new(QueueConfig { concurrency_limit: limit }, handler).unwrap()
    }

    #[test]
    fn zero_limit_is_rejected() {
        let handler = Arc::new(ManualHandler::default());
        assert!(matches!(
            RunQueue::new(QueueConfig { concurrency_limit: 0 }, handler),
            Err(QueueError::InvalidArgument(_))
        ));
    }

    #[test]
    fn default_limit_is_explicit() {
        assert_eq!(
            QueueConfig::default().concurrency_limit,
            DEFAULT_CONCURRENCY_LIMIT
        );
    }

    #[tokio::test]
    async fn admits_up_to_limit_then_frees_on_completion() {
        let handler = Arc::new(ManualHandler::default());
        let queue = queue_with(2, handler.clone());
        let ids: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();
        for id in &ids {
            handler.prepare(*id);
            queue.enqueue(Uuid::new_v4(), *id);
        }
        settle().await;

        assert_eq!(
            queue.status(),
            QueueStatus { queue_length: 1, active_count: 2, concurrency_limit: 2 }
        );
        assert_eq!(handler.started(), ids[..2].to_vec());

        handler.finish(ids[0]);
        settle().await;

        assert_eq!(handler.started(), ids);
        assert!(!queue.is_active(ids[0]));
        assert!(queue.is_active(ids[2]));
        assert_eq!(queue.status().queue_length, 0);
    }

    #[tokio::test]
    async fn raising_limit_admits_waiting_items() {
        let handler = Arc::new(ManualHandler::default());
        let queue = queue_with(1, handler.clone());
        for _ in 0..3 {
            let id = Uuid::new_v4();
            handler.prepare(id);
            queue.enqueue(Uuid::new_v4(), id);
        }
        settle().await;
        assert_eq!(queue.status().active_count, 1);

        queue.set_concurrency_limit(3).unwrap();
        settle().await;
        assert_eq!(queue.status().active_count, 3);
        assert_eq!(queue.status().queue_length, 0);
    }

    #[tokio::test]
    async fn lowering_limit_keeps_in_flight_runs() {
        let handler = Arc::new(ManualHandler::default());
        let queue = queue_with(2, handler.clone());
        for _ in 0..3 {
            let id = Uuid::new_v4();
            handler.prepare(id);
            queue.enqueue(Uuid::new_v4(), id);
        }
        settle().await;

        queue.set_concurrency_limit(1).unwrap();
        assert_eq!(
            queue.status(),
            QueueStatus { queue_length: 1, active_count: 2, concurrency_limit: 1 }
        );
        assert!(matches!(
            queue.set_concurrency_limit(0),
            Err(QueueError::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn removed_items_are_never_started() {
        let handler = Arc::new(ManualHandler::default());
        let queue = queue_with(1, handler.clone());
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        handler.prepare(first);
        queue.enqueue(Uuid::new_v4(), first);
        queue.enqueue(Uuid::new_v4(), second);

        assert!(queue.remove(second));
        assert!(!queue.remove(second));
        assert!(!queue.remove(first), "active runs cannot be removed");

        handler.finish(first);
        settle().await;
        assert_eq!(handler.started(), vec![first]);
    }

    #[tokio::test]
    async fn panicking_run_still_releases_slot() {
        let queue = queue_with(1, Arc::new(PanickingHandler));
        queue.enqueue(Uuid::new_v4(), Uuid::new_v4());
        queue.enqueue(Uuid::new_v4(), Uuid::new_v4());
        settle().await;

        assert_eq!(
            queue.status(),
            QueueStatus { queue_length: 0, active_count: 0, concurrency_limit: 1 }
        );
    }
}

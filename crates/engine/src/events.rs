//! In-process lifecycle event bus.
//!
//! Each subscriber owns an unbounded channel, so publishing never waits on a
//! slow consumer and every live subscriber sees every event in emission
//! order. Subscribers are pruned once their receiver is dropped.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

/// A lifecycle transition observed by the engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    ExecutionQueued {
        execution_id: Uuid,
        workflow_id: Uuid,
        timestamp: DateTime<Utc>,
    },
    ExecutionStarted {
        execution_id: Uuid,
        workflow_id: Uuid,
        timestamp: DateTime<Utc>,
    },
    ExecutionCompleted {
        execution_id: Uuid,
        workflow_id: Uuid,
        timestamp: DateTime<Utc>,
    },
    ExecutionFailed {
        execution_id: Uuid,
        workflow_id: Uuid,
        node_id: Option<String>,
        error: String,
        timestamp: DateTime<Utc>,
    },
    ExecutionCancelled {
        execution_id: Uuid,
        workflow_id: Uuid,
        timestamp: DateTime<Utc>,
    },
    NodeStarted {
        execution_id: Uuid,
        node_id: String,
        timestamp: DateTime<Utc>,
    },
    NodeCompleted {
        execution_id: Uuid,
        node_id: String,
        output: Value,
        timestamp: DateTime<Utc>,
    },
    NodeFailed {
        execution_id: Uuid,
        node_id: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
}

impl EngineEvent {
    pub fn execution_id(&self) -> Uuid {
        match self {
            Self::ExecutionQueued { execution_id, .. }
            | Self::ExecutionStarted { execution_id, .. }
            | Self::ExecutionCompleted { execution_id, .. }
            | Self::ExecutionFailed { execution_id, .. }
            | Self::ExecutionCancelled { execution_id, .. }
            | Self::NodeStarted { execution_id, .. }
            | Self::NodeCompleted { execution_id, .. }
            | Self::NodeFailed { execution_id, .. } => *execution_id,
        }
    }
}

/// Receiving end handed to a subscriber.
pub type EventReceiver = mpsc::UnboundedReceiver<EngineEvent>;

/// Cheaply cloneable handle; all clones publish to the same subscribers.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<EngineEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber. It receives every event published from now on.
    pub fn subscribe(&self) -> EventReceiver {
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().push(tx);
        rx
    }

    /// Deliver `event` to every live subscriber without blocking.
    pub fn publish(&self, event: EngineEvent) {
        self.lock().retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().iter().filter(|tx| !tx.is_closed()).count()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<mpsc::UnboundedSender<EngineEvent>>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node_started(execution_id: Uuid, node_id: &str) -> EngineEvent {
        EngineEvent::NodeStarted {
            execution_id,
            node_id: node_id.into(),
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn every_subscriber_sees_events_in_order() {
        let bus = EventBus::new();
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();
        let id = Uuid::new_v4();

        bus.publish(node_started(id, "a"));
        bus.publish(node_started(id, "b"));

        for rx in [&mut first, &mut second] {
            for expected in ["a", "b"] {
                match rx.recv().await.unwrap() {
                    EngineEvent::NodeStarted { node_id, .. } => assert_eq!(node_id, expected),
                    other => panic!("unexpected event {other:?}"),
                }
            }
        }
    }

    #[tokio::test]
    async fn dropped_subscribers_are_pruned() {
        let bus = EventBus::new();
        let kept = bus.subscribe();
        drop(bus.subscribe());
        assert_eq!(bus.subscriber_count(), 1);

        bus.publish(node_started(Uuid::new_v4(), "a"));
        assert_eq!(bus.subscribers.lock().unwrap().len(), 1);
        drop(kept);
    }

    #[test]
    fn publish_without_subscribers_is_a_no_op() {
        EventBus::new().publish(node_started(Uuid::new_v4(), "a"));
    }

    #[test]
    fn events_serialize_with_tag() {
        let event = node_started(Uuid::nil(), "a");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "node_started");
        assert_eq!(json["node_id"], "a");
        assert_eq!(event.execution_id(), Uuid::nil());
    }
}

//! Data types shared between the queue and its callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Concurrency limit used when none is configured.
pub const DEFAULT_CONCURRENCY_LIMIT: usize = 5;

/// Tuning knobs for the run queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum number of runs executing at the same time. Must be at least 1.
    pub concurrency_limit: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency_limit: DEFAULT_CONCURRENCY_LIMIT,
        }
    }
}

/// A run waiting for admission. Lives only until its run starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunQueueItem {
    pub workflow_id: Uuid,
    pub execution_id: Uuid,
    pub queued_at: DateTime<Utc>,
}

/// Point-in-time view of the queue counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    pub queue_length: usize,
    pub active_count: usize,
    pub concurrency_limit: usize,
}

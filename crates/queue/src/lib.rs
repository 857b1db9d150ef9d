//! `queue` crate — concurrency-bounded admission of workflow runs.
//!
//! The queue knows nothing about workflows beyond their ids: callers supply
//! a [`RunHandler`] that executes an admitted run to a terminal state, and
//! the queue caps how many of those run at once.

pub mod error;
pub mod models;
pub mod run_queue;

pub use error::QueueError;
pub use models::{QueueConfig, QueueStatus, RunQueueItem, DEFAULT_CONCURRENCY_LIMIT};
pub use run_queue::{RunHandler, RunQueue};

//! Typed errors at the retry-queue boundary.
//!
//! Everything else in the agent propagates with `anyhow::Result`, matching
//! the rest of the codebase; the queue gets its own enum because callers
//! branch on `ItemNotFound` specifically (see `LocalQueue::increment_retry`).

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue item {0} not found")]
    ItemNotFound(i64),
    #[error("queue storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

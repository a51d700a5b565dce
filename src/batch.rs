//! Generic size/time-threshold batching queue.
//!
//! Not on the critical ingest path — the agent delivers one record per
//! sync, not in batches — but kept available as a building block for a
//! future bulk-import mode. See `BatchQueue::add`'s doc comment for the
//! two flush conditions it implements.

use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::info;

const DEFAULT_MAX_SIZE: usize = 500;
const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy)]
pub struct BatchStats {
    pub pending_count: usize,
    pub max_size: usize,
    pub flush_interval: Duration,
    pub seconds_since_last_flush: f64,
    pub is_empty: bool,
}

struct Inner<T> {
    items: Vec<T>,
    last_flush: Instant,
}

/// An in-memory queue that accumulates items until either `max_size` is
/// reached or `flush_interval` has elapsed since the last flush.
pub struct BatchQueue<T> {
    max_size: usize,
    flush_interval: Duration,
    inner: Mutex<Inner<T>>,
}

impl<T> BatchQueue<T> {
    pub fn new(max_size: usize, flush_interval: Duration) -> Self {
        Self {
            max_size,
            flush_interval,
            inner: Mutex::new(Inner {
                items: Vec::new(),
                last_flush: Instant::now(),
            }),
        }
    }

    /// Add `item`. Returns `Some(batch)` if adding it crossed a flush
    /// threshold (size or time) — the caller is then responsible for
    /// processing the returned batch. Returns `None` otherwise.
    pub async fn add(&self, item: T) -> Option<Vec<T>> {
        let mut inner = self.inner.lock().await;
        inner.items.push(item);

        if inner.items.len() >= self.max_size {
            info!(max_size = self.max_size, "batch queue size threshold reached");
            return Some(self.flush_internal(&mut inner));
        }

        if Self::should_flush(&inner, self.flush_interval) {
            let elapsed = inner.last_flush.elapsed().as_secs_f64();
            info!(elapsed, count = inner.items.len(), "batch queue time threshold reached");
            return Some(self.flush_internal(&mut inner));
        }

        None
    }

    fn should_flush(inner: &Inner<T>, flush_interval: Duration) -> bool {
        !inner.items.is_empty() && inner.last_flush.elapsed() >= flush_interval
    }

    fn flush_internal(&self, inner: &mut Inner<T>) -> Vec<T> {
        let batch = std::mem::take(&mut inner.items);
        inner.last_flush = Instant::now();
        batch
    }

    /// Unconditionally drain whatever is pending, e.g. at shutdown.
    pub async fn flush(&self) -> Vec<T> {
        let mut inner = self.inner.lock().await;
        if !inner.items.is_empty() {
            info!(count = inner.items.len(), "batch queue force flush");
        }
        self.flush_internal(&mut inner)
    }

    pub async fn pending_count(&self) -> usize {
        self.inner.lock().await.items.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.items.is_empty()
    }

    pub async fn seconds_since_last_flush(&self) -> f64 {
        self.inner.lock().await.last_flush.elapsed().as_secs_f64()
    }

    pub async fn get_stats(&self) -> BatchStats {
        let inner = self.inner.lock().await;
        BatchStats {
            pending_count: inner.items.len(),
            max_size: self.max_size,
            flush_interval: self.flush_interval,
            seconds_since_last_flush: inner.last_flush.elapsed().as_secs_f64(),
            is_empty: inner.items.is_empty(),
        }
    }
}

impl<T> Default for BatchQueue<T> {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SIZE, DEFAULT_FLUSH_INTERVAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn size_threshold_triggers_flush_and_resets() {
        let queue: BatchQueue<i32> = BatchQueue::new(3, Duration::from_secs(60));

        assert!(queue.add(1).await.is_none());
        assert!(queue.add(2).await.is_none());
        let batch = queue.add(3).await.unwrap();

        assert_eq!(batch, vec![1, 2, 3]);
        assert_eq!(queue.pending_count().await, 0);
        assert!(queue.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn time_threshold_triggers_flush_even_below_size() {
        let queue: BatchQueue<&str> = BatchQueue::new(500, Duration::from_millis(100));

        assert!(queue.add("a").await.is_none());
        tokio::time::advance(Duration::from_millis(150)).await;

        let batch = queue.add("b").await.unwrap();
        assert_eq!(batch, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn force_flush_drains_pending_without_threshold() {
        let queue: BatchQueue<i32> = BatchQueue::new(500, Duration::from_secs(60));
        queue.add(1).await;
        queue.add(2).await;

        let batch = queue.flush().await;
        assert_eq!(batch, vec![1, 2]);
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn force_flush_on_empty_queue_returns_empty_batch() {
        let queue: BatchQueue<i32> = BatchQueue::default();
        assert!(queue.flush().await.is_empty());
    }

    #[tokio::test]
    async fn stats_reflect_pending_state() {
        let queue: BatchQueue<i32> = BatchQueue::new(10, Duration::from_secs(30));
        queue.add(1).await;

        let stats = queue.get_stats().await;
        assert_eq!(stats.pending_count, 1);
        assert_eq!(stats.max_size, 10);
        assert!(!stats.is_empty);
    }
}

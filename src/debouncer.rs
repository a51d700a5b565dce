//! Per-path dispatch handoff.
//!
//! Coalescing rapid event bursts per path into a single delivery after
//! quiescence (spec's "producers write files in multiple passes, and
//! antivirus products rescan them" concern) is handled inside
//! `notify-debouncer-full`'s own timer, owned by `src/watcher.rs` — not by
//! a hand-rolled cancel-and-rearm map. What remains on this side of the
//! channel is handing each already-debounced `(path, kind)` off to a
//! spawned upload task without blocking the caller, and tracking those
//! in-flight tasks so shutdown can let them finish naturally instead of
//! abandoning them mid-upload.

use std::future::Future;
use std::path::PathBuf;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::watcher::EventKind;

pub struct Debouncer {
    in_flight: Mutex<Vec<JoinHandle<()>>>,
}

impl Debouncer {
    pub fn new() -> Self {
        Self {
            in_flight: Mutex::new(Vec::new()),
        }
    }

    /// Spawn `upload(path, kind)` and track the resulting task so
    /// `shutdown` can wait for it. `upload` must return immediately with
    /// the future to run — it must not itself block before that.
    pub async fn dispatch<F, Fut>(&self, path: PathBuf, kind: EventKind, upload: F)
    where
        F: FnOnce(PathBuf, EventKind) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(upload(path, kind));
        let mut in_flight = self.in_flight.lock().await;
        in_flight.retain(|h| !h.is_finished());
        in_flight.push(handle);
    }

    /// Number of dispatched uploads not yet finished (observability / test hook).
    pub async fn in_flight_count(&self) -> usize {
        let mut in_flight = self.in_flight.lock().await;
        in_flight.retain(|h| !h.is_finished());
        in_flight.len()
    }

    /// Let every in-flight upload finish naturally; nothing is aborted.
    pub async fn shutdown(&self) {
        let handles = std::mem::take(&mut *self.in_flight.lock().await);
        for handle in handles {
            let _ = handle.await;
        }
    }
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn dispatch_runs_the_upload_with_the_given_path_and_kind() {
        let debouncer = Debouncer::new();
        let path = PathBuf::from("/data/PGFX_live_data_export GameID=1.json");
        let seen = Arc::new(Mutex::new(None));
        let seen_clone = seen.clone();

        debouncer
            .dispatch(path.clone(), EventKind::Modified, move |p, k| {
                let seen = seen_clone;
                async move {
                    *seen.lock().await = Some((p, k));
                }
            })
            .await;

        debouncer.shutdown().await;
        assert_eq!(*seen.lock().await, Some((path, EventKind::Modified)));
    }

    #[tokio::test]
    async fn shutdown_waits_for_in_flight_uploads_to_finish() {
        let debouncer = Debouncer::new();
        let completed = Arc::new(AtomicUsize::new(0));
        let counter = completed.clone();

        debouncer
            .dispatch(PathBuf::from("/data/a.json"), EventKind::Created, move |_, _| async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .await;

        debouncer.shutdown().await;
        assert_eq!(completed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn in_flight_count_drops_once_the_task_completes() {
        let debouncer = Debouncer::new();
        debouncer
            .dispatch(PathBuf::from("/data/a.json"), EventKind::Created, |_, _| async {})
            .await;

        tokio::task::yield_now().await;
        assert_eq!(debouncer.in_flight_count().await, 0);
    }
}

//! Periodic drain of the retry queue.
//!
//! Suspends cooperatively between cycles; a failed item simply waits for
//! the next cycle; there is no per-item exponential backoff.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use crate::queue::LocalQueue;
use crate::uploader::Uploader;

pub struct RetryLoop {
    queue: LocalQueue,
    uploader: Arc<Uploader>,
    interval: Duration,
}

impl RetryLoop {
    pub fn new(queue: LocalQueue, uploader: Arc<Uploader>, interval_secs: u64) -> Self {
        Self {
            queue,
            uploader,
            interval: Duration::from_secs(interval_secs),
        }
    }

    /// Drain up to 50 pending items, reattempting each through the
    /// uploader. Returns the number that succeeded this cycle.
    pub async fn process_once(&self) -> anyhow::Result<usize> {
        let pending = self.queue.get_pending_default().await?;
        if pending.is_empty() {
            return Ok(0);
        }
        info!(count = pending.len(), "processing queued items");

        let mut succeeded = 0;
        for item in pending {
            let path = PathBuf::from(&item.file_path);

            if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
                warn!(path = %path.display(), "queued file not found");
                let msg = format!("File not found: {}", path.display());
                if let Err(e) = self.queue.mark_failed(item.id, &msg).await {
                    error!(id = item.id, err = %e, "failed to mark missing file as failed");
                }
                continue;
            }

            let outcome = self.uploader.sync_file(&path, &item.operation).await;

            if outcome.success {
                if let Err(e) = self.queue.mark_completed(item.id).await {
                    error!(id = item.id, err = %e, "failed to mark item completed");
                } else {
                    succeeded += 1;
                    info!(path = %path.display(), "retry-attempt succeeded");
                }
                continue;
            }

            match self.queue.increment_retry(item.id).await {
                Ok(new_count) => {
                    let max_retries = self.queue.max_retries() as i64;
                    if new_count >= max_retries {
                        let msg = format!(
                            "Max retries exceeded: {}",
                            outcome.error_message.as_deref().unwrap_or("unknown error")
                        );
                        if let Err(e) = self.queue.mark_failed(item.id, &msg).await {
                            error!(id = item.id, err = %e, "failed to mark item failed");
                        }
                        error!(
                            path = %path.display(),
                            retries = new_count,
                            "retry-exhausted"
                        );
                    } else {
                        warn!(
                            path = %path.display(),
                            retry_count = new_count,
                            max_retries,
                            "retry-attempt failed, will retry next cycle"
                        );
                    }
                }
                Err(e) => error!(id = item.id, err = %e, "failed to record retry attempt"),
            }
        }

        info!(succeeded, "queue processing completed");
        Ok(succeeded)
    }

    /// Run forever, draining the queue every `interval`. Intended to be
    /// `tokio::spawn`ed; aborting the resulting `JoinHandle` stops the loop
    /// after the in-flight cycle finishes.
    pub async fn run(self: Arc<Self>) {
        loop {
            tokio::time::sleep(self.interval).await;
            if let Err(e) = self.process_once().await {
                warn!(err = %e, "retry loop cycle failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{RemoteClient, RemoteRecord};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FlakyRemote {
        fail_next: Mutex<bool>,
    }

    #[async_trait::async_trait]
    impl RemoteClient for FlakyRemote {
        async fn is_duplicate(&self, _digest: &str) -> anyhow::Result<bool> {
            Ok(false)
        }

        async fn insert(&self, _record: &RemoteRecord) -> anyhow::Result<()> {
            if *self.fail_next.lock().unwrap() {
                anyhow::bail!("still offline");
            }
            Ok(())
        }

        async fn health_check(&self) -> bool {
            true
        }
    }

    #[derive(Default)]
    struct AlwaysFailRemote;

    #[async_trait::async_trait]
    impl RemoteClient for AlwaysFailRemote {
        async fn is_duplicate(&self, _digest: &str) -> anyhow::Result<bool> {
            Ok(false)
        }
        async fn insert(&self, _record: &RemoteRecord) -> anyhow::Result<()> {
            anyhow::bail!("offline")
        }
        async fn health_check(&self) -> bool {
            false
        }
    }

    #[tokio::test]
    async fn missing_file_is_marked_failed_immediately() {
        let queue_dir = tempfile::tempdir().unwrap();
        let queue = LocalQueue::open(&queue_dir.path().join("q.db"), 5)
            .await
            .unwrap();
        let id = queue
            .enqueue("/does/not/exist.json", "created")
            .await
            .unwrap();

        let remote = Arc::new(FlakyRemote::default());
        let uploader = Arc::new(Uploader::new(remote, queue.clone()));
        let retry_loop = RetryLoop::new(queue.clone(), uploader, 60);

        let succeeded = retry_loop.process_once().await.unwrap();
        assert_eq!(succeeded, 0);

        let stats = queue.get_stats().await.unwrap();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.pending, 0);
        let _ = id;
    }

    #[tokio::test]
    async fn recovers_after_remote_comes_back() {
        let dir = tempfile::tempdir().unwrap();
        let path_a = dir.path().join("PGFX_live_data_export GameID=1.json");
        let path_b = dir.path().join("PGFX_live_data_export GameID=2.json");
        tokio::fs::write(&path_a, r#"{"ID":"a","Hands":[]}"#)
            .await
            .unwrap();
        tokio::fs::write(&path_b, r#"{"ID":"b","Hands":[]}"#)
            .await
            .unwrap();

        let queue_dir = tempfile::tempdir().unwrap();
        let queue = LocalQueue::open(&queue_dir.path().join("q.db"), 5)
            .await
            .unwrap();
        queue
            .enqueue(path_a.to_str().unwrap(), "created")
            .await
            .unwrap();
        queue
            .enqueue(path_b.to_str().unwrap(), "created")
            .await
            .unwrap();

        assert_eq!(queue.get_stats().await.unwrap().pending, 2);

        let remote = Arc::new(FlakyRemote {
            fail_next: Mutex::new(false),
        });
        let uploader = Arc::new(Uploader::new(remote, queue.clone()));
        let retry_loop = RetryLoop::new(queue.clone(), uploader, 60);

        let succeeded = retry_loop.process_once().await.unwrap();
        assert_eq!(succeeded, 2);

        let stats = queue.get_stats().await.unwrap();
        assert_eq!(stats.completed, 2);
        assert_eq!(stats.pending, 0);
    }

    #[tokio::test]
    async fn retry_exhaustion_marks_failed_after_max_retries() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("PGFX_live_data_export GameID=bad.json");
        tokio::fs::write(&path, "{ not json").await.unwrap();

        let queue_dir = tempfile::tempdir().unwrap();
        let queue = LocalQueue::open(&queue_dir.path().join("q.db"), 5)
            .await
            .unwrap();
        queue
            .enqueue(path.to_str().unwrap(), "created")
            .await
            .unwrap();

        let remote = Arc::new(AlwaysFailRemote);
        let uploader = Arc::new(Uploader::new(remote, queue.clone()));
        let retry_loop = RetryLoop::new(queue.clone(), uploader, 60);

        for cycle in 1..=5 {
            retry_loop.process_once().await.unwrap();
            let stats = queue.get_stats().await.unwrap();
            if cycle < 5 {
                assert_eq!(stats.pending, 1, "cycle {cycle}");
            } else {
                assert_eq!(stats.pending, 0, "cycle {cycle}");
                assert_eq!(stats.failed, 1, "cycle {cycle}");
            }
        }
    }
}

//! Turns a single file path into at most one remote record, or a retry.
//!
//! This is the one component allowed to touch both the filesystem and the
//! network. It never raises across its public boundary — every exceptional
//! path is folded into an [`UploadOutcome`] with `success = false` and
//! `queued` indicating whether the failure was durably persisted.

use std::path::Path;
use std::sync::Arc;

use serde_json::Value;
use sha2::{Digest as _, Sha256};
use tracing::{error, info, warn};

use crate::config::SYNC_SOURCE;
use crate::queue::LocalQueue;
use crate::remote::{RemoteClient, RemoteRecord};

/// Result of a single sync attempt, mirroring the original agent's
/// `SyncResult` dataclass field-for-field.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadOutcome {
    pub success: bool,
    pub session_id: Option<String>,
    pub hand_count: i64,
    pub error_message: Option<String>,
    pub queued: bool,
}

impl UploadOutcome {
    fn success(session_id: Option<String>, hand_count: i64, queued: bool) -> Self {
        Self {
            success: true,
            session_id,
            hand_count,
            error_message: None,
            queued,
        }
    }

    fn failure(error_message: String, queued: bool) -> Self {
        Self {
            success: false,
            session_id: None,
            hand_count: 0,
            error_message: Some(error_message),
            queued,
        }
    }
}

pub struct Uploader {
    remote: Arc<dyn RemoteClient>,
    queue: LocalQueue,
}

impl Uploader {
    pub fn new(remote: Arc<dyn RemoteClient>, queue: LocalQueue) -> Self {
        Self { remote, queue }
    }

    /// Sync `path` to the remote store. `operation` is carried through to
    /// the retry queue for audit only — it does not change the procedure.
    pub async fn sync_file(&self, path: &Path, operation: &str) -> UploadOutcome {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        info!(path = %path.display(), operation, "sync-start");

        match self.try_sync(path).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let error_msg = format!("Sync failed for {file_name}: {e}");
                error!(path = %path.display(), err = %e, "sync-fail");

                let path_str = path.to_string_lossy().to_string();
                match self.queue.enqueue(&path_str, operation).await {
                    Ok(id) => {
                        info!(path = %path.display(), queue_id = id, "queued");
                        UploadOutcome::failure(error_msg, true)
                    }
                    Err(queue_err) => {
                        error!(path = %path.display(), err = %queue_err, "failed to queue file");
                        UploadOutcome::failure(error_msg, false)
                    }
                }
            }
        }
    }

    /// Steps 1-5 of the procedure: read, hash, dedup-check, build, insert.
    /// Any `Err` here is the uploader's single enqueue trigger.
    async fn try_sync(&self, path: &Path) -> anyhow::Result<UploadOutcome> {
        let bytes = tokio::fs::read(path).await?;
        let data: Value = serde_json::from_slice(&bytes)?;
        if !data.is_object() {
            anyhow::bail!("expected a JSON object at the top level");
        }

        let digest = compute_digest(&bytes);

        if self.remote.is_duplicate(&digest).await? {
            info!(path = %path.display(), digest = %digest, "dedup-skip");
            return Ok(UploadOutcome::success(
                session_id_of(&data),
                hand_count_of(&data),
                false,
            ));
        }

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let record = RemoteRecord {
            session_id: session_id_of(&data),
            file_name,
            file_hash: digest.clone(),
            table_type: string_field(&data, "Type").unwrap_or_else(|| "UNKNOWN".to_string()),
            event_title: string_field(&data, "EventTitle").unwrap_or_default(),
            software_version: string_field(&data, "SoftwareVersion").unwrap_or_default(),
            hand_count: hand_count_of(&data),
            session_created_at: string_field(&data, "CreatedDateTimeUTC"),
            sync_source: SYNC_SOURCE.to_string(),
            sync_status: "synced".to_string(),
            raw_json: data,
        };

        self.remote.insert(&record).await?;

        info!(
            path = %path.display(),
            session_id = ?record.session_id,
            digest = %digest,
            "sync-success"
        );

        Ok(UploadOutcome::success(
            record.session_id.clone(),
            record.hand_count,
            false,
        ))
    }
}

fn compute_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex_encode(&hasher.finalize())
}

fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write;
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        write!(out, "{b:02x}").expect("writing to a String never fails");
    }
    out
}

fn session_id_of(data: &Value) -> Option<String> {
    string_field(data, "ID")
}

fn hand_count_of(data: &Value) -> i64 {
    data.get("Hands")
        .and_then(Value::as_array)
        .map(|a| a.len() as i64)
        .unwrap_or(0)
}

fn string_field(data: &Value, key: &str) -> Option<String> {
    data.get(key).and_then(Value::as_str).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeRemote {
        existing_hashes: Mutex<Vec<String>>,
        inserted: Mutex<Vec<RemoteRecord>>,
        fail_insert: bool,
        fail_duplicate_check: bool,
    }

    #[async_trait::async_trait]
    impl RemoteClient for FakeRemote {
        async fn is_duplicate(&self, digest: &str) -> anyhow::Result<bool> {
            if self.fail_duplicate_check {
                anyhow::bail!("duplicate check unavailable");
            }
            Ok(self
                .existing_hashes
                .lock()
                .unwrap()
                .iter()
                .any(|h| h == digest))
        }

        async fn insert(&self, record: &RemoteRecord) -> anyhow::Result<()> {
            if self.fail_insert {
                anyhow::bail!("connection refused");
            }
            self.inserted.lock().unwrap().push(record.clone());
            self.existing_hashes
                .lock()
                .unwrap()
                .push(record.file_hash.clone());
            Ok(())
        }

        async fn health_check(&self) -> bool {
            true
        }
    }

    async fn write_export(dir: &std::path::Path, name: &str, body: &str) -> std::path::PathBuf {
        let path = dir.join(name);
        tokio::fs::write(&path, body).await.unwrap();
        path
    }

    #[tokio::test]
    async fn happy_path_inserts_and_returns_session_and_hand_count() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_export(
            dir.path(),
            "PGFX_live_data_export GameID=123.json",
            r#"{"ID":"g123","Type":"Tournament","Hands":[{"HandNumber":1},{"HandNumber":2}]}"#,
        )
        .await;

        let remote = Arc::new(FakeRemote::default());
        let queue_dir = tempfile::tempdir().unwrap();
        let queue = LocalQueue::open(&queue_dir.path().join("q.db"), 5)
            .await
            .unwrap();
        let uploader = Uploader::new(remote.clone(), queue);

        let outcome = uploader.sync_file(&path, "created").await;
        assert!(outcome.success);
        assert_eq!(outcome.session_id.as_deref(), Some("g123"));
        assert_eq!(outcome.hand_count, 2);
        assert!(!outcome.queued);
        assert_eq!(remote.inserted.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn duplicate_upload_is_a_dedup_skip_with_no_second_insert() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_export(
            dir.path(),
            "PGFX_live_data_export GameID=123.json",
            r#"{"ID":"g123","Hands":[]}"#,
        )
        .await;

        let remote = Arc::new(FakeRemote::default());
        let queue_dir = tempfile::tempdir().unwrap();
        let queue = LocalQueue::open(&queue_dir.path().join("q.db"), 5)
            .await
            .unwrap();
        let uploader = Uploader::new(remote.clone(), queue);

        let first = uploader.sync_file(&path, "created").await;
        assert!(first.success);
        let second = uploader.sync_file(&path, "modified").await;
        assert!(second.success);
        assert!(!second.queued);

        assert_eq!(remote.inserted.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn missing_id_field_yields_none_session_id() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_export(
            dir.path(),
            "PGFX_live_data_export GameID=999.json",
            r#"{"Type":"CashGame","Hands":[]}"#,
        )
        .await;

        let remote = Arc::new(FakeRemote::default());
        let queue_dir = tempfile::tempdir().unwrap();
        let queue = LocalQueue::open(&queue_dir.path().join("q.db"), 5)
            .await
            .unwrap();
        let uploader = Uploader::new(remote, queue);

        let outcome = uploader.sync_file(&path, "created").await;
        assert!(outcome.success);
        assert_eq!(outcome.session_id, None);
        assert_eq!(outcome.hand_count, 0);
    }

    #[tokio::test]
    async fn parse_failure_enqueues_a_retry() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_export(
            dir.path(),
            "PGFX_live_data_export GameID=bad.json",
            "{ not json",
        )
        .await;

        let remote = Arc::new(FakeRemote::default());
        let queue_dir = tempfile::tempdir().unwrap();
        let queue = LocalQueue::open(&queue_dir.path().join("q.db"), 5)
            .await
            .unwrap();
        let uploader = Uploader::new(remote, queue.clone());

        let outcome = uploader.sync_file(&path, "created").await;
        assert!(!outcome.success);
        assert!(outcome.queued);

        let stats = queue.get_stats().await.unwrap();
        assert_eq!(stats.pending, 1);
    }

    #[tokio::test]
    async fn remote_insert_failure_enqueues_a_retry() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_export(
            dir.path(),
            "PGFX_live_data_export GameID=1.json",
            r#"{"ID":"g1","Hands":[]}"#,
        )
        .await;

        let remote = Arc::new(FakeRemote {
            fail_insert: true,
            ..Default::default()
        });
        let queue_dir = tempfile::tempdir().unwrap();
        let queue = LocalQueue::open(&queue_dir.path().join("q.db"), 5)
            .await
            .unwrap();
        let uploader = Uploader::new(remote, queue.clone());

        let outcome = uploader.sync_file(&path, "created").await;
        assert!(!outcome.success);
        assert!(outcome.queued);
        assert_eq!(queue.get_stats().await.unwrap().pending, 1);
    }
}

//! Durable retry queue.
//!
//! A FIFO of failed deliveries backed by a single-file SQLite database.
//! Every operation opens a short-lived connection against the pool and
//! commits before returning — no transaction is ever held across an upload
//! attempt — so a forced termination mid-retry never leaves the database
//! write-locked.

use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqliteSynchronous};
use sqlx::SqlitePool;

use crate::error::QueueError;

const DEFAULT_PENDING_LIMIT: i64 = 50;

/// Terminal and non-terminal states a `QueueItem` can be in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueStatus {
    Pending,
    Completed,
    Failed,
}

impl QueueStatus {
    fn as_str(self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Completed => "completed",
            QueueStatus::Failed => "failed",
        }
    }
}

impl FromStr for QueueStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(QueueStatus::Pending),
            "completed" => Ok(QueueStatus::Completed),
            "failed" => Ok(QueueStatus::Failed),
            other => Err(anyhow::anyhow!("unknown queue status: {other}")),
        }
    }
}

/// A durable retry entry, as read back from the `queue` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct QueueItem {
    pub id: i64,
    pub file_path: String,
    pub operation: String,
    pub created_at: DateTime<Utc>,
    pub retry_count: i64,
    pub status: String,
    pub error_message: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl QueueItem {
    pub fn status(&self) -> QueueStatus {
        // The column is only ever written by this module, so a parse
        // failure here means the database was hand-edited or corrupted.
        self.status
            .parse()
            .unwrap_or_else(|_| panic!("invalid status in queue row {}: {:?}", self.id, self.status))
    }
}

/// Aggregate counts across all rows, regardless of `max_retries`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub pending: i64,
    pub completed: i64,
    pub failed: i64,
}

/// The SQLite-backed retry queue.
#[derive(Clone)]
pub struct LocalQueue {
    pool: SqlitePool,
    max_retries: u32,
}

impl LocalQueue {
    /// Open (creating if needed) the queue database at `db_path`, running
    /// schema migrations. The parent directory is created on first use.
    pub async fn open(db_path: &Path, max_retries: u32) -> anyhow::Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let opts = SqliteConnectOptions::from_str(&format!(
            "sqlite://{}?mode=rwc",
            db_path.display()
        ))?
        .journal_mode(SqliteJournalMode::Wal)
        .synchronous(SqliteSynchronous::Normal)
        .create_if_missing(true);

        let pool = SqlitePool::connect_with(opts).await?;
        sqlx::query(include_str!("migrations/001_init.sql"))
            .execute(&pool)
            .await?;

        Ok(Self { pool, max_retries })
    }

    /// Insert a new row and return its assigned id.
    pub async fn enqueue(&self, file_path: &str, operation: &str) -> anyhow::Result<i64> {
        let created_at = Utc::now();
        let result = sqlx::query(
            "INSERT INTO queue (file_path, operation, created_at) VALUES (?, ?, ?)",
        )
        .bind(file_path)
        .bind(operation)
        .bind(created_at)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Rows with `status = 'pending' AND retry_count < max_retries`, ordered
    /// by id (FIFO), up to `limit`.
    pub async fn get_pending(&self, limit: i64) -> anyhow::Result<Vec<QueueItem>> {
        let rows = sqlx::query_as::<_, QueueItem>(
            "SELECT id, file_path, operation, created_at, retry_count, status, error_message, completed_at \
             FROM queue \
             WHERE status = 'pending' AND retry_count < ? \
             ORDER BY id ASC \
             LIMIT ?",
        )
        .bind(self.max_retries as i64)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Convenience wrapper using the spec default limit of 50.
    pub async fn get_pending_default(&self) -> anyhow::Result<Vec<QueueItem>> {
        self.get_pending(DEFAULT_PENDING_LIMIT).await
    }

    pub async fn mark_completed(&self, item_id: i64) -> anyhow::Result<()> {
        let completed_at = Utc::now();
        sqlx::query("UPDATE queue SET status = ?, completed_at = ? WHERE id = ?")
            .bind(QueueStatus::Completed.as_str())
            .bind(completed_at)
            .bind(item_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn mark_failed(&self, item_id: i64, error_message: &str) -> anyhow::Result<()> {
        sqlx::query("UPDATE queue SET status = ?, error_message = ? WHERE id = ?")
            .bind(QueueStatus::Failed.as_str())
            .bind(error_message)
            .bind(item_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Atomically read-then-write `retry_count + 1`, returning the new
    /// count. Errors with `QueueError::ItemNotFound` if `item_id` is absent.
    pub async fn increment_retry(&self, item_id: i64) -> Result<i64, QueueError> {
        let mut tx = self.pool.begin().await?;

        let current: Option<(i64,)> =
            sqlx::query_as("SELECT retry_count FROM queue WHERE id = ?")
                .bind(item_id)
                .fetch_optional(&mut *tx)
                .await?;

        let Some((current_count,)) = current else {
            return Err(QueueError::ItemNotFound(item_id));
        };

        let new_count = current_count + 1;
        sqlx::query("UPDATE queue SET retry_count = ? WHERE id = ?")
            .bind(new_count)
            .bind(item_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(new_count)
    }

    /// Aggregate counts over all rows.
    pub async fn get_stats(&self) -> anyhow::Result<QueueStats> {
        let row: (i64, i64, i64) = sqlx::query_as(
            "SELECT \
                COALESCE(SUM(CASE WHEN status = 'pending' THEN 1 ELSE 0 END), 0), \
                COALESCE(SUM(CASE WHEN status = 'completed' THEN 1 ELSE 0 END), 0), \
                COALESCE(SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END), 0) \
             FROM queue",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(QueueStats {
            pending: row.0,
            completed: row.1,
            failed: row.2,
        })
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }
}

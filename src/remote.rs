//! The remote session store client.
//!
//! Speaks the backend's REST surface directly over `reqwest` rather than a
//! vendor SDK — the same PostgREST conventions a generated client would use
//! (`?column=eq.value` filters, `Prefer: return=minimal` on insert). One
//! instance is shared across every upload task; it is the only process-wide
//! mutable (well — stateless, but shared) resource this agent owns besides
//! the queue pool.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

const TABLE: &str = "gfx_sessions";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// A row inserted into the remote `gfx_sessions` table.
#[derive(Debug, Clone, Serialize)]
pub struct RemoteRecord {
    pub session_id: Option<String>,
    pub file_name: String,
    pub file_hash: String,
    pub raw_json: Value,
    pub table_type: String,
    pub event_title: String,
    pub software_version: String,
    pub hand_count: i64,
    pub session_created_at: Option<String>,
    pub sync_source: String,
    pub sync_status: String,
}

/// Everything the uploader needs from the remote backend. A trait object so
/// tests can substitute an in-memory fake without standing up an HTTP
/// server for every case.
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// True if a row with `file_hash = digest` already exists.
    ///
    /// The original agent treats a failed duplicate check as "not a
    /// duplicate" (attempt the upload rather than silently dropping the
    /// file), and this implementation does the same.
    async fn is_duplicate(&self, digest: &str) -> Result<bool>;

    /// Insert a new row. Errors propagate to the caller, which enqueues a
    /// retry — this method never itself enqueues anything.
    async fn insert(&self, record: &RemoteRecord) -> Result<()>;

    /// Non-fatal connectivity probe used at startup.
    async fn health_check(&self) -> bool;
}

/// `reqwest`-backed [`RemoteClient`] speaking PostgREST conventions.
pub struct HttpRemoteClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpRemoteClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        })
    }

    fn rest_url(&self, path: &str) -> String {
        format!("{}/rest/v1/{path}", self.base_url)
    }

    fn authed(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {}", self.api_key))
    }
}

#[async_trait]
impl RemoteClient for HttpRemoteClient {
    async fn is_duplicate(&self, digest: &str) -> Result<bool> {
        let url = self.rest_url(&format!("{TABLE}?select=file_hash&file_hash=eq.{digest}"));
        let response = self.authed(self.http.get(&url)).send().await?;
        let response = response.error_for_status()?;
        let rows: Vec<Value> = response.json().await?;
        Ok(!rows.is_empty())
    }

    async fn insert(&self, record: &RemoteRecord) -> Result<()> {
        let url = self.rest_url(TABLE);
        let response = self
            .authed(self.http.post(&url))
            .header("Prefer", "return=minimal")
            .json(record)
            .send()
            .await?;
        response.error_for_status()?;
        Ok(())
    }

    async fn health_check(&self) -> bool {
        let url = self.rest_url(&format!("{TABLE}?select=id&limit=1"));
        match self.authed(self.http.get(&url)).send().await {
            Ok(response) => match response.error_for_status() {
                Ok(_) => true,
                Err(e) => {
                    warn!(err = %e, "remote health check failed");
                    false
                }
            },
            Err(e) => {
                warn!(err = %e, "remote health check failed");
                false
            }
        }
    }
}

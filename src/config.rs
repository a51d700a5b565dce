//! Agent configuration.
//!
//! Settings are loaded from environment variables, optionally seeded by a
//! `config.env` file (dotenv format) passed via `--config` or found in the
//! current directory. Environment variables always win over the file, and
//! the file always wins over the built-in default — the same precedence the
//! original Python agent applied through `pydantic-settings`.

use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

const DEFAULT_CONFIG_FILE: &str = "config.env";

const DEFAULT_WATCH_PATH: &str = "C:/GFX/output";
const DEFAULT_QUEUE_DB_PATH: &str = "C:/GFX/sync_queue/pending.db";
const DEFAULT_LOG_PATH: &str = "C:/GFX/logs/sync_agent.log";

const DEFAULT_DEBOUNCE_SECONDS: f64 = 2.0;
const DEFAULT_RETRY_DELAY: f64 = 5.0;
const DEFAULT_MAX_RETRIES: u32 = 5;
const DEFAULT_QUEUE_PROCESS_INTERVAL: u64 = 60;
const DEFAULT_LOG_LEVEL: &str = "INFO";

/// The identifier the uploader stamps on every record it inserts
/// (`RemoteRecord.sync_source`).
pub const SYNC_SOURCE: &str = "gfx_pc_direct";

/// Fully resolved agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub remote_url: String,
    pub remote_key: String,
    pub watch_path: String,
    pub queue_db_path: String,
    pub debounce_seconds: f64,
    pub retry_delay: f64,
    pub max_retries: u32,
    pub queue_process_interval: u64,
    pub log_level: String,
    pub log_path: Option<String>,
}

impl AgentConfig {
    /// Load settings from environment variables, optionally seeded by a
    /// config file.
    ///
    /// Priority (highest to lowest):
    ///   1. Environment variables already set in the process.
    ///   2. The `config.env` file at `config_path` (or `./config.env` if
    ///      `config_path` is `None` and the default file exists).
    ///   3. Built-in defaults.
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        match config_path {
            Some(path) => {
                dotenvy::from_path(path)
                    .with_context(|| format!("failed to read config file {}", path.display()))?;
            }
            None => {
                // Best-effort: a missing default file is not an error.
                let _ = dotenvy::from_filename(DEFAULT_CONFIG_FILE);
            }
        }

        let remote_url = require_env("REMOTE_URL")?;
        let remote_key = require_env("REMOTE_KEY")?;

        let watch_path = normalize_path(&env_or(
            "GFX_WATCH_PATH",
            DEFAULT_WATCH_PATH,
        ));
        let queue_db_path = normalize_path(&env_or("QUEUE_DB_PATH", DEFAULT_QUEUE_DB_PATH));
        let log_path_raw = env_or("LOG_PATH", DEFAULT_LOG_PATH);
        let log_path = if log_path_raw.is_empty() {
            None
        } else {
            Some(normalize_path(&log_path_raw))
        };

        let debounce_seconds = parse_env_or("DEBOUNCE_SECONDS", DEFAULT_DEBOUNCE_SECONDS)?;
        let retry_delay = parse_env_or("RETRY_DELAY", DEFAULT_RETRY_DELAY)?;
        let max_retries = parse_env_or("MAX_RETRIES", DEFAULT_MAX_RETRIES)?;
        let queue_process_interval =
            parse_env_or("QUEUE_PROCESS_INTERVAL", DEFAULT_QUEUE_PROCESS_INTERVAL)?;
        let log_level = env_or("LOG_LEVEL", DEFAULT_LOG_LEVEL);

        Ok(Self {
            remote_url,
            remote_key,
            watch_path,
            queue_db_path,
            debounce_seconds,
            retry_delay,
            max_retries,
            queue_process_interval,
            log_level,
            log_path,
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    env::var(key).with_context(|| format!("missing required setting: {key}"))
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_env_or<T: std::str::FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid value for {key} ({raw:?}): {e}")),
        Err(_) => Ok(default),
    }
}

/// Normalize a path to forward-slash form regardless of host OS, matching
/// the original agent's `Path(v).as_posix()` validator.
fn normalize_path(raw: &str) -> String {
    PathBuf::from(raw).to_string_lossy().replace('\\', "/")
}

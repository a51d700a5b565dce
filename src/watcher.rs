//! Polling directory watcher with built-in per-path debounce.
//!
//! The capture workstation's export directory is a network share; OS-level
//! inotify-equivalents are unreliable there, so this watches via
//! `notify::PollWatcher` on a fixed cadence. Coalescing rapid event bursts
//! per path into a single delivery after quiescence — spec's Debouncer
//! concern — is handled by `notify-debouncer-full` itself rather than a
//! hand-rolled cancel-and-rearm map: the crate's `new_debouncer_opt` is
//! generic over any `notify::Watcher` impl, the same way the teacher's own
//! config hot-reload watcher (`daemon/src/config/mod.rs`'s `ConfigWatcher`)
//! builds one over the default `RecommendedWatcher`, just substituting
//! `PollWatcher` here for the network-share case. Non-recursive —
//! subdirectories are never inspected.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Result;
use notify_debouncer_full::notify::{Config, PollWatcher, RecursiveMode, Watcher as _};
use notify_debouncer_full::{new_debouncer_opt, DebounceEventResult, Debouncer, NoCache};
use tokio::sync::mpsc;
use tracing::{info, warn};

const FILE_PATTERN_PREFIX: &str = "PGFX_live_data_export GameID=";
const FILE_PATTERN_SUFFIX: &str = ".json";
const POLL_INTERVAL: Duration = Duration::from_secs(2);
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Basename-only match against `PGFX_live_data_export GameID=*.json`.
pub fn matches_pattern(file_name: &str) -> bool {
    file_name.len() > FILE_PATTERN_PREFIX.len() + FILE_PATTERN_SUFFIX.len()
        && file_name.starts_with(FILE_PATTERN_PREFIX)
        && file_name.ends_with(FILE_PATTERN_SUFFIX)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Created,
    Modified,
    Existing,
}

#[derive(Debug, Clone)]
pub struct FileEvent {
    pub path: PathBuf,
    pub kind: EventKind,
}

/// A running debounced poll watcher plus the channel it feeds. The crate's
/// event-handler callback runs on its own internal background thread; the
/// handoff into the async world crosses over this channel — a genuine
/// cross-thread message, never a pretense that the callback runs on a
/// tokio task.
pub struct DirectoryWatcher {
    watch_path: PathBuf,
    inner: Option<Debouncer<PollWatcher, NoCache>>,
}

impl DirectoryWatcher {
    /// Start polling `watch_path`, debouncing bursts within
    /// `debounce_seconds` of each other into one event per path. Performs
    /// the initial scan (one `Existing` event per already-present match)
    /// before returning, so files written during downtime are queued
    /// before the first poll tick.
    pub fn start(
        watch_path: PathBuf,
        debounce_seconds: f64,
    ) -> Result<(Self, mpsc::UnboundedReceiver<FileEvent>)> {
        let (tx, rx) = mpsc::unbounded_channel();

        for event in scan_existing(&watch_path) {
            let _ = tx.send(event);
        }

        let handler_tx = tx.clone();
        let timeout = Duration::from_secs_f64(debounce_seconds.max(0.0));
        let config = Config::default().with_poll_interval(POLL_INTERVAL);

        let mut debouncer = new_debouncer_opt::<_, PollWatcher, NoCache>(
            timeout,
            None,
            move |result: DebounceEventResult| dispatch_result(result, &handler_tx),
            NoCache::default(),
            config,
        )?;

        debouncer.watcher().watch(&watch_path, RecursiveMode::NonRecursive)?;

        info!(path = %watch_path.display(), debounce_seconds, "watching");

        Ok((
            Self {
                watch_path,
                inner: Some(debouncer),
            },
            rx,
        ))
    }

    /// Halt polling within 5s. Idempotent.
    pub async fn stop(&mut self) {
        if let Some(debouncer) = self.inner.take() {
            let joined = tokio::task::spawn_blocking(move || drop(debouncer));
            if tokio::time::timeout(STOP_TIMEOUT, joined).await.is_err() {
                warn!("watcher did not stop within 5s");
            }
        }
        info!(path = %self.watch_path.display(), "file watcher stopped");
    }
}

fn scan_existing(watch_path: &Path) -> Vec<FileEvent> {
    let mut found = Vec::new();

    let entries = match std::fs::read_dir(watch_path) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(err = %e, path = %watch_path.display(), "initial scan failed");
            return found;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            continue;
        }
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            if matches_pattern(name) {
                found.push(FileEvent {
                    path,
                    kind: EventKind::Existing,
                });
            }
        }
    }

    if !found.is_empty() {
        info!(count = found.len(), "found existing files, starting sync");
    }

    found
}

fn dispatch_result(result: DebounceEventResult, tx: &mpsc::UnboundedSender<FileEvent>) {
    match result {
        Ok(events) => {
            for event in events {
                dispatch_event(event, tx);
            }
        }
        Err(errors) => {
            for e in errors {
                warn!(err = %e, "watcher poll error");
            }
        }
    }
}

fn dispatch_event(
    event: notify_debouncer_full::DebouncedEvent,
    tx: &mpsc::UnboundedSender<FileEvent>,
) {
    #[allow(deprecated)]
    let notify_event = &event.event;

    let kind = match notify_event.kind {
        notify_debouncer_full::notify::EventKind::Create(_) => EventKind::Created,
        notify_debouncer_full::notify::EventKind::Modify(_) => EventKind::Modified,
        _ => return,
    };

    for path in &notify_event.paths {
        if path.is_dir() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if matches_pattern(name) && tx.send(FileEvent { path: path.clone(), kind }).is_err() {
            return;
        }
    }
}

//! Wires the five components together and owns their lifecycle.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use crate::config::AgentConfig;
use crate::debouncer::Debouncer;
use crate::queue::LocalQueue;
use crate::remote::HttpRemoteClient;
use crate::retry_loop::RetryLoop;
use crate::uploader::Uploader;
use crate::watcher::DirectoryWatcher;

pub struct App {
    config: AgentConfig,
    watcher: DirectoryWatcher,
    debouncer: Debouncer,
    uploader: Arc<Uploader>,
    retry_task: tokio::task::JoinHandle<()>,
    events: tokio::sync::mpsc::UnboundedReceiver<crate::watcher::FileEvent>,
}

impl App {
    /// Construct every component from `config` and start the watcher and
    /// retry loop. Does not block; call `run` to drive the ingest pipeline.
    pub async fn start(config: AgentConfig) -> Result<Self> {
        let queue = LocalQueue::open(Path::new(&config.queue_db_path), config.max_retries).await?;
        let remote = Arc::new(HttpRemoteClient::new(
            config.remote_url.clone(),
            config.remote_key.clone(),
        )?);

        if !remote.health_check().await {
            warn!("remote health check failed at startup, continuing anyway");
        } else {
            info!("remote health check passed");
        }

        let uploader = Arc::new(Uploader::new(remote, queue.clone()));
        let debouncer = Debouncer::new();

        let retry_loop = Arc::new(RetryLoop::new(
            queue.clone(),
            uploader.clone(),
            config.queue_process_interval,
        ));
        let retry_task = tokio::spawn(retry_loop.run());

        let (watcher, events) =
            DirectoryWatcher::start(PathBuf::from(&config.watch_path), config.debounce_seconds)?;

        Ok(Self {
            config,
            watcher,
            debouncer,
            uploader,
            retry_task,
            events,
        })
    }

    /// Drive the watcher → debouncer → uploader pipeline until `shutdown`
    /// resolves or the event channel closes (the watcher thread stopped).
    pub async fn run(mut self, shutdown: impl std::future::Future<Output = ()>) {
        info!(
            watch_path = %self.config.watch_path,
            debounce_seconds = self.config.debounce_seconds,
            "gfx sync agent started"
        );

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    info!("shutdown signal received");
                    break;
                }

                event = self.events.recv() => {
                    let Some(event) = event else {
                        warn!("file watcher channel closed unexpectedly");
                        break;
                    };

                    let uploader = self.uploader.clone();
                    let operation = match event.kind {
                        crate::watcher::EventKind::Created | crate::watcher::EventKind::Existing => {
                            "created"
                        }
                        crate::watcher::EventKind::Modified => "modified",
                    };

                    self.debouncer
                        .dispatch(event.path, event.kind, move |path, _kind| {
                            let uploader = uploader.clone();
                            let operation = operation.to_string();
                            async move {
                                uploader.sync_file(&path, &operation).await;
                            }
                        })
                        .await;
                }
            }
        }

        self.shutdown().await;
    }

    async fn shutdown(mut self) {
        info!("shutting down");
        self.watcher.stop().await;
        self.debouncer.shutdown().await;
        self.retry_task.abort();
    }
}

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use gfx_sync_agent::{config::AgentConfig, queue::LocalQueue, App};
use tracing::{error, info};

#[derive(Parser)]
#[command(
    name = "gfx-sync-agent",
    about = "Watches GFX JSON exports and forwards them to the remote session store",
    version
)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to a config.env file. Defaults to ./config.env if present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the agent in the foreground (default when no subcommand given).
    Serve,
    /// Print pending/completed/failed counts from the local retry queue and exit.
    QueueStats,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    if let Err(e) = run(args).await {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let config = AgentConfig::load(args.config.as_deref()).context("failed to load configuration")?;

    let _log_guard = setup_logging(&config.log_level, config.log_path.as_deref());

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config).await,
        Command::QueueStats => queue_stats(&config).await,
    }
}

async fn serve(config: AgentConfig) -> Result<()> {
    let app = App::start(config).await.context("failed to start agent")?;

    app.run(make_shutdown_future()).await;
    info!("gfx sync agent stopped");
    Ok(())
}

async fn queue_stats(config: &AgentConfig) -> Result<()> {
    let queue = LocalQueue::open(std::path::Path::new(&config.queue_db_path), config.max_retries)
        .await
        .context("failed to open retry queue")?;
    let stats = queue.get_stats().await?;
    println!(
        "{}",
        serde_json::json!({
            "pending": stats.pending,
            "completed": stats.completed,
            "failed": stats.failed,
        })
    );
    Ok(())
}

/// Resolves when a shutdown signal is received: SIGTERM or Ctrl-C on Unix,
/// Ctrl-C only elsewhere.
async fn make_shutdown_future() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(e) => {
                error!(err = %e, "failed to register SIGTERM handler");
                tokio::signal::ctrl_c().await.ok();
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
    }
}

/// Initialize the tracing subscriber. If `log_path` is set, logs go to both
/// stdout and a daily-rolling file; otherwise stdout only. Falls back to
/// stdout-only with a warning if the log directory can't be created.
fn setup_logging(
    log_level: &str,
    log_path: Option<&str>,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let Some(path) = log_path else {
        tracing_subscriber::fmt().with_env_filter(log_level).compact().init();
        return None;
    };

    let path = std::path::Path::new(path);
    let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
    let filename = path
        .file_name()
        .unwrap_or_else(|| std::ffi::OsStr::new("sync_agent.log"));

    if let Err(e) = std::fs::create_dir_all(dir) {
        eprintln!(
            "warn: could not create log directory '{}': {e} — falling back to stdout",
            dir.display()
        );
        tracing_subscriber::fmt().with_env_filter(log_level).compact().init();
        return None;
    }

    let appender = tracing_appender::rolling::daily(dir, filename);
    let (non_blocking, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(log_level))
        .with(tracing_subscriber::fmt::layer().compact())
        .with(tracing_subscriber::fmt::layer().with_writer(non_blocking))
        .init();

    Some(guard)
}

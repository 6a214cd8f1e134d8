//! Push Daemon
//!
//! Polls the remote task queue and executes each queued task via the Claude
//! Code CLI in an isolated git worktree, up to a fixed concurrency bound.
//! State is observable through the status snapshot written every tick.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use push_daemon::pidfile::PidFile;
use push_daemon::queue::{QueueClient, QueueConfig};
use push_daemon::scheduler::{Scheduler, SchedulerConfig};
use push_daemon::scope;
use push_daemon::status::StatusPublisher;
use push_daemon::supervisor::AgentSupervisor;
use push_daemon::workspace::WorkspaceManager;

#[derive(Parser, Debug)]
#[command(name = "push-daemon")]
#[command(version, about = "Push daemon - autonomous task execution via Claude Code")]
struct Args {
    /// Task API base URL
    #[arg(
        long,
        default_value = "https://jxuzqcbqhiaxmfitzxlo.supabase.co/functions/v1",
        env = "PUSH_API_URL"
    )]
    api_url: String,

    /// Seconds between scheduler ticks
    #[arg(long, default_value_t = 30, env = "PUSH_POLL_INTERVAL")]
    poll_interval: u64,

    /// Maximum concurrent agent processes
    #[arg(long, default_value_t = 3, env = "PUSH_MAX_CONCURRENT")]
    max_concurrent: usize,

    /// Path to the agent CLI binary
    #[arg(long, default_value = "claude", env = "PUSH_AGENT_BIN")]
    agent_bin: PathBuf,

    /// Base directory for task workspaces (default: parent of the repository)
    #[arg(long, env = "PUSH_WORKSPACE_DIR")]
    workspace_dir: Option<PathBuf>,

    /// State directory for the pid marker and status snapshot
    #[arg(long, env = "PUSH_STATE_DIR")]
    state_dir: Option<PathBuf>,

    /// Project scope key override (normalized git remote)
    #[arg(long, env = "PUSH_GIT_REMOTE")]
    git_remote: Option<String>,

    /// Machine name stamped into the status snapshot
    #[arg(long, env = "PUSH_MACHINE_NAME")]
    machine_name: Option<String>,

    /// Log level filter for the daemon (e.g. "info", "debug", "warn").
    #[arg(long, default_value = "info", env = "PUSH_LOG_LEVEL")]
    log_level: String,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long, env = "PUSH_LOG_JSON")]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_filter = format!("push_daemon={}", args.log_level);
    push_core::tracing_init::init_tracing(&log_filter, args.log_json);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        poll_interval = args.poll_interval,
        max_concurrent = args.max_concurrent,
        "Starting push-daemon"
    );

    let api_key = push_core::config::require_api_key()?;

    let state_dir = match args.state_dir {
        Some(dir) => dir,
        None => default_state_dir()?,
    };
    let pid_file = PidFile::acquire(state_dir.join("daemon.pid"))
        .context("Failed to acquire daemon pid file")?;

    let repo_dir = std::env::current_dir()?;
    let scope = match args.git_remote {
        Some(remote) => Some(push_core::remote::normalize_remote_url(&remote)),
        None => scope::detect(&repo_dir).await,
    };
    if scope.is_none() {
        warn!("Not inside a git repository with an origin remote; fetching tasks unscoped");
    }

    // Workspaces live next to the repository so agents check out siblings,
    // never subdirectories of the tree they edit.
    let workspace_dir = args.workspace_dir.unwrap_or_else(|| {
        repo_dir
            .parent()
            .map_or_else(|| repo_dir.clone(), Path::to_path_buf)
    });

    let queue = QueueClient::new(&QueueConfig {
        base_url: args.api_url,
        api_key,
    })?;
    let workspaces = WorkspaceManager::new(repo_dir, workspace_dir);
    let supervisor = AgentSupervisor::new(args.agent_bin);

    let machine_name = args
        .machine_name
        .or_else(|| std::env::var("HOSTNAME").ok())
        .unwrap_or_else(|| "unknown".to_string());
    let publisher = StatusPublisher::new(state_dir.join("daemon_status.json"), machine_name);

    let config = SchedulerConfig {
        max_concurrent: args.max_concurrent,
        poll_interval: std::time::Duration::from_secs(args.poll_interval),
        scope,
    };

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    spawn_signal_listener(shutdown_tx);

    let mut scheduler =
        Scheduler::new(queue, workspaces, supervisor, publisher, config).with_pid_file(pid_file);
    scheduler.run(shutdown_rx).await;

    info!("Daemon stopped");
    Ok(())
}

/// Forward Ctrl+C / SIGTERM to the scheduler as a watch-channel signal.
///
/// The shutdown sequence then runs at a tick boundary on the control task
/// instead of inside a signal handler.
fn spawn_signal_listener(shutdown_tx: tokio::sync::watch::Sender<bool>) {
    tokio::spawn(async move {
        #[cfg(unix)]
        let sigterm_future = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to install SIGTERM handler");
                    std::future::pending::<()>().await;
                }
            }
        };
        #[cfg(not(unix))]
        let sigterm_future = std::future::pending::<()>();

        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Received Ctrl+C shutdown signal"),
            () = sigterm_future => info!("Received SIGTERM shutdown signal"),
        }

        let _ = shutdown_tx.send(true);
    });
}

/// Default state directory: ~/.push
fn default_state_dir() -> anyhow::Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Cannot determine home directory"))?;
    Ok(home.join(".push"))
}

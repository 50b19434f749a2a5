#![forbid(unsafe_code)]

//! `agent-conductor`: long-running wrapper instance.
//!
//! Registers itself in the project's instance registry, serves the IPC
//! socket for `agent-conductor-ctl`, supervises agent sessions, and marks
//! itself ended on shutdown.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use agent_conductor::config::GlobalConfig;
use agent_conductor::instance::{current_tty, new_instance_id, AppState};
use agent_conductor::ipc::server::spawn_ipc_server;
use agent_conductor::orchestrator::TokioClock;
use agent_conductor::persistence::db;
use agent_conductor::persistence::instance_repo::InstanceRepo;
use agent_conductor::registry::{paths, InstanceRegistry};
use agent_conductor::{AppError, Result};

#[derive(Debug, Copy, Clone, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "agent-conductor", about = "Agent session wrapper instance", version, long_about = None)]
struct Cli {
    /// Project root the instance works on.
    #[arg(long, default_value = ".")]
    project: PathBuf,

    /// Path to the TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log output format (text or json).
    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Use this instance id instead of a generated one.
    #[arg(long)]
    instance_id: Option<String>,
}

fn main() -> Result<()> {
    let args = Cli::parse();
    init_tracing(args.log_format)?;
    info!("agent-conductor bootstrap");

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| AppError::Config(format!("failed to build tokio runtime: {err}")))?
        .block_on(run(args))
}

async fn run(args: Cli) -> Result<()> {
    // ── Load configuration ──────────────────────────────
    let config = match args.config {
        Some(ref path) => GlobalConfig::load_from_path(path)?,
        None => GlobalConfig::for_project(&args.project)?,
    };
    let config = Arc::new(config);
    info!(project = %config.project_root.display(), "configuration loaded");

    // ── Initialize database ─────────────────────────────
    let db = Arc::new(db::connect(&config.db_path()).await?);
    info!("database connected");

    // ── Register in the instance registry ───────────────
    let registry = InstanceRegistry::from_config(&config);
    let reconciled = {
        let registry = registry.clone();
        off_runtime(move || registry.list()).await?
    };
    info!(known = reconciled.len(), "registry reconciled");
    let live_instances: HashSet<String> = reconciled
        .iter()
        .filter(|e| e.is_live())
        .map(|e| e.instance_id.clone())
        .collect();

    let instance_id = args.instance_id.unwrap_or_else(new_instance_id);
    let socket_path = paths::socket_path(&config.socket_dir(), registry.project_hash(), &instance_id)?;

    let entry = {
        let registry = registry.clone();
        let (id, socket) = (instance_id.clone(), socket_path.clone());
        off_runtime(move || registry.register(&id, std::process::id(), current_tty(), &socket)).await?
    };
    let instances = InstanceRepo::new(Arc::clone(&db));
    if let Err(err) = instances.upsert(&entry).await {
        warn!(%err, "failed to record instance row");
    }
    info!(%instance_id, pid = entry.pid, socket = %socket_path.display(), "instance registered");

    // ── Build shared application state ──────────────────
    let state = Arc::new(AppState::build(
        Arc::clone(&config),
        db,
        instance_id.clone(),
        socket_path.clone(),
        Arc::new(TokioClock::new()),
    )?);
    let restored = state.agents.load_active_agents().await?;
    if restored > 0 {
        warn!(restored, "sessions from an earlier run of this instance settled as interrupted");
    }
    state.agents.settle_orphaned_sessions(&live_instances).await?;

    // ── Start IPC server ────────────────────────────────
    let ct = CancellationToken::new();
    let ipc_handle = spawn_ipc_server(Arc::clone(&state), ct.clone())?;
    info!("agent-conductor ready");

    // ── Wait for shutdown signal ────────────────────────
    shutdown_signal().await;
    info!("shutdown signal received");
    ct.cancel();

    if let Err(err) = graceful_shutdown(&state, &registry, &instances).await {
        error!(%err, "error during graceful shutdown");
    }

    if let Err(err) = ipc_handle.await {
        warn!(%err, "IPC server task ended abnormally");
    }
    info!("agent-conductor shut down");
    Ok(())
}

/// Interrupt every live agent, mark the instance ended and remove the
/// socket file.
///
/// # Errors
///
/// Returns `AppError` if the registry cannot be updated.
async fn graceful_shutdown(
    state: &AppState,
    registry: &InstanceRegistry,
    instances: &InstanceRepo,
) -> Result<()> {
    let _span = tracing::info_span!("graceful_shutdown").entered();

    let interrupted = state.agents.interrupt_all("shutdown").await;

    if let Err(err) = instances.mark_ended(&state.instance_id, Some(0)).await {
        error!(%err, "failed to record instance end");
    }
    {
        let registry = registry.clone();
        let id = state.instance_id.clone();
        off_runtime(move || registry.mark_ended(&id, Some(0))).await?;
    }

    if let Err(err) = std::fs::remove_file(&state.socket_path) {
        if err.kind() != std::io::ErrorKind::NotFound {
            warn!(%err, "failed to remove socket file");
        }
    }

    info!(interrupted, "graceful shutdown complete");
    Ok(())
}

/// Run a blocking registry operation on the blocking thread pool.
async fn off_runtime<T, F>(op: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(op)
        .await
        .map_err(|err| AppError::Io(format!("registry task panicked: {err}")))?
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler, using ctrl-c only");
                let _ = ctrl_c.await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(err) = ctrl_c.await {
            error!(%err, "ctrl-c signal handler failed");
        }
    }
}

fn init_tracing(log_format: LogFormat) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = fmt().with_env_filter(env_filter);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| AppError::Config(format!("failed to init tracing: {err}")))?,
    }

    Ok(())
}

//! Shared state of a running wrapper instance.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::config::GlobalConfig;
use crate::orchestrator::{AgentManager, Clock, Executor, ManagerSettings};
use crate::persistence::db::Database;
use crate::persistence::runtime_process_repo::RuntimeProcessRepo;
use crate::persistence::session_repo::SessionRepo;
use crate::session_log::SessionLogStore;
use crate::Result;

/// Everything the IPC handlers and shutdown path need.
pub struct AppState {
    /// Global configuration.
    pub config: Arc<GlobalConfig>,
    /// `SQLite` connection pool.
    pub db: Arc<Database>,
    /// Id of this instance.
    pub instance_id: String,
    /// OS process id of this instance.
    pub pid: u32,
    /// Socket the instance listens on.
    pub socket_path: PathBuf,
    /// Start time.
    pub started_at: DateTime<Utc>,
    /// Agent supervisor.
    pub agents: AgentManager,
    /// Backend launcher.
    pub executor: Executor,
    /// Session execution logs.
    pub log: Arc<SessionLogStore>,
    /// Session rows.
    pub sessions: SessionRepo,
    /// Runtime process rows.
    pub processes: RuntimeProcessRepo,
}

impl AppState {
    /// Wire up the lifecycle components of one instance.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the session log directory cannot be created.
    pub fn build(
        config: Arc<GlobalConfig>,
        db: Arc<Database>,
        instance_id: String,
        socket_path: PathBuf,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let log = Arc::new(SessionLogStore::new(config.log_dir())?);
        let sessions = SessionRepo::new(Arc::clone(&db));
        let processes = RuntimeProcessRepo::new(Arc::clone(&db));

        let agents = AgentManager::new(
            sessions.clone(),
            Arc::clone(&log),
            clock,
            ManagerSettings {
                instance_id: instance_id.clone(),
                poll_interval: config.wait_poll_interval(),
                max_spawn_count: config.max_spawn_count,
            },
        );
        let executor = Executor::new(
            agents.clone(),
            processes.clone(),
            Arc::clone(&log),
            config.runtime.commands.clone(),
            config.project_root.clone(),
        );

        info!(%instance_id, socket = %socket_path.display(), "instance state built");
        Ok(Self {
            config,
            db,
            instance_id,
            pid: std::process::id(),
            socket_path,
            started_at: Utc::now(),
            agents,
            executor,
            log,
            sessions,
            processes,
        })
    }

    /// Overview returned by the `status` action.
    pub async fn status(&self) -> InstanceStatus {
        InstanceStatus {
            instance_id: self.instance_id.clone(),
            pid: self.pid,
            project_root: self.config.project_root.display().to_string(),
            socket_path: self.socket_path.display().to_string(),
            started_at: self.started_at,
            agents: self.agents.snapshots().await,
        }
    }
}

/// Result payload of the `status` action.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceStatus {
    /// Id of the instance.
    pub instance_id: String,
    /// OS process id.
    pub pid: u32,
    /// Project root.
    pub project_root: String,
    /// Socket path.
    pub socket_path: String,
    /// Start time.
    pub started_at: DateTime<Utc>,
    /// Supervised agents, oldest first.
    pub agents: Vec<crate::orchestrator::AgentSnapshot>,
}

/// Fresh instance id.
#[must_use]
pub fn new_instance_id() -> String {
    Uuid::new_v4().to_string()
}

/// Terminal attached to standard input, if any.
#[must_use]
pub fn current_tty() -> Option<String> {
    #[cfg(unix)]
    {
        use std::os::fd::AsFd;

        let stdin = std::io::stdin();
        nix::unistd::ttyname(stdin.as_fd())
            .ok()
            .map(|p| p.display().to_string())
    }
    #[cfg(not(unix))]
    {
        None
    }
}

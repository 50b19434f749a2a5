//! Waiting on several sessions at once.

use std::time::Duration;

use futures_util::future::{join_all, select_all, BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::models::agent::AgentStatus;
use crate::models::session::SessionStatus;
use crate::session_log::{summarize, SessionLogStore, SessionProgress};
use crate::{AppError, Result};

use super::agent_manager::AgentManager;

/// Completion condition of a multi-session wait.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum WaitMode {
    /// Every session must finish.
    #[default]
    All,
    /// One finished session is enough.
    Any,
}

/// State of one session when a wait returns.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SessionSummary {
    /// Session id.
    pub session_id: String,
    /// Persisted status.
    pub status: SessionStatus,
    /// In-memory status, when the agent is still supervised here.
    pub agent_status: Option<AgentStatus>,
    /// Progress read from the session log.
    pub progress: SessionProgress,
}

/// Outcome of [`wait_for_sessions`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct WaitReport {
    /// Condition that was waited for.
    pub mode: WaitMode,
    /// Whether the bound elapsed before the condition held.
    pub timed_out: bool,
    /// Every requested session, in request order.
    pub sessions: Vec<SessionSummary>,
}

/// Wait until all (or any) of `session_ids` finish, bounded by `timeout`.
///
/// # Errors
///
/// Returns `AppError::Validation` for an empty id list, `AppError::NotFound`
/// for an unknown session, or a persistence error.
pub async fn wait_for_sessions(
    manager: &AgentManager,
    log: &SessionLogStore,
    session_ids: &[String],
    mode: WaitMode,
    timeout: Duration,
) -> Result<WaitReport> {
    if session_ids.is_empty() {
        return Err(AppError::Validation(
            "at least one session id is required".into(),
        ));
    }
    for id in session_ids {
        manager.sessions().require(id).await?;
    }

    let clock = manager.clock();
    let deadline = clock.now() + timeout;
    let waits: Vec<BoxFuture<'_, bool>> = session_ids
        .iter()
        .map(|id| wait_one(manager, id, deadline).boxed())
        .collect();

    let condition = async move {
        match mode {
            WaitMode::All => {
                join_all(waits).await;
            }
            WaitMode::Any => {
                let mut pending = waits;
                loop {
                    let (finished, _, rest) = select_all(pending).await;
                    if finished || rest.is_empty() {
                        break;
                    }
                    pending = rest;
                }
            }
        }
    };

    tokio::select! {
        () = condition => {}
        () = clock.sleep(timeout) => debug!("wait bound elapsed"),
    }

    let mut sessions = Vec::with_capacity(session_ids.len());
    for id in session_ids {
        let session = manager.sessions().require(id).await?;
        let agent_status = manager.snapshot(id).await.map(|a| a.status);
        let progress = summarize(&log.read(id)?);
        sessions.push(SessionSummary {
            session_id: id.clone(),
            status: session.status,
            agent_status,
            progress,
        });
    }

    let finished = sessions.iter().filter(|s| is_finished(s)).count();
    let timed_out = match mode {
        WaitMode::All => finished < sessions.len(),
        WaitMode::Any => finished == 0,
    };
    info!(?mode, finished, total = sessions.len(), timed_out, "wait returned");

    Ok(WaitReport {
        mode,
        timed_out,
        sessions,
    })
}

/// Wait for one session until `deadline` on the manager clock.
///
/// A shared poll loop started by a shorter wait may time out first; the
/// wait is then re-entered with the time left.
async fn wait_one(manager: &AgentManager, session_id: &str, deadline: Duration) -> bool {
    let clock = manager.clock();
    loop {
        let remaining = deadline.saturating_sub(clock.now());
        if remaining.is_zero() {
            return false;
        }
        match manager.wait(session_id, remaining).await {
            Ok(_) => return true,
            Err(AppError::Timeout(_)) => debug!(session_id, "shared wait ended early, re-entering"),
            // Not supervised here; the persisted status decides.
            Err(AppError::NotFound(_)) => return wait_persisted(manager, session_id, deadline).await,
            Err(err) => {
                warn!(session_id, %err, "wait failed");
                return false;
            }
        }
    }
}

/// Poll the stored status of an unsupervised session until it is terminal
/// or `deadline` passes.
async fn wait_persisted(manager: &AgentManager, session_id: &str, deadline: Duration) -> bool {
    let clock = manager.clock();
    loop {
        match manager.sessions().get_by_id(session_id).await {
            Ok(Some(session)) if session.status.is_terminal() => return true,
            Ok(Some(_)) => {}
            Ok(None) => return false,
            Err(err) => {
                warn!(session_id, %err, "failed to read session status");
                return false;
            }
        }
        let remaining = deadline.saturating_sub(clock.now());
        if remaining.is_zero() {
            return false;
        }
        clock.sleep(manager.poll_interval().min(remaining)).await;
    }
}

fn is_finished(summary: &SessionSummary) -> bool {
    summary.status.is_terminal() || summary.agent_status.is_some_and(AgentStatus::is_terminal)
}

//! In-memory supervision of agent sessions.
//!
//! [`AgentManager`] owns the map of live [`Agent`] handles for one wrapper
//! instance. Every mutation holds the map lock across the matching
//! `SessionRepo` write, so the persisted row and the in-memory handle move
//! together and concurrent spawn/interrupt/complete/fail calls never
//! interleave. The persisted store stays the source of truth; the map is
//! rebuilt from it with [`AgentManager::load_active_agents`] at startup,
//! settling sessions whose backends did not survive the restart.
//!
//! Interrupts are cooperative: the handle's [`CancellationToken`] is
//! cancelled and the execution loop is expected to observe it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::models::agent::{AgentStatus, AgentType};
use crate::models::session::{Metadata, Session, SessionStatus};
use crate::persistence::session_repo::SessionRepo;
use crate::session_log::{LogEvent, SessionLogStore};
use crate::{AppError, Result};

use super::clock::Clock;

/// Live supervision handle for one session.
#[derive(Debug)]
pub struct Agent {
    /// Session the handle supervises.
    pub session_id: String,
    /// Kind of agent.
    pub agent_type: AgentType,
    /// Authoritative in-memory status.
    pub status: AgentStatus,
    /// Cooperative cancellation signal for the execution loop.
    pub cancel: CancellationToken,
    /// Handle creation time.
    pub started_at: DateTime<Utc>,
    /// Time a terminal status was reached.
    pub completed_at: Option<DateTime<Utc>>,
    inbox_tx: mpsc::UnboundedSender<String>,
    inbox_rx: Option<mpsc::UnboundedReceiver<String>>,
}

impl Agent {
    fn new(session_id: &str, agent_type: AgentType, status: AgentStatus) -> Self {
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        Self {
            session_id: session_id.to_owned(),
            agent_type,
            status,
            cancel: CancellationToken::new(),
            started_at: Utc::now(),
            completed_at: None,
            inbox_tx,
            inbox_rx: Some(inbox_rx),
        }
    }

    fn snapshot(&self) -> AgentSnapshot {
        AgentSnapshot {
            session_id: self.session_id.clone(),
            agent_type: self.agent_type,
            status: self.status,
            started_at: self.started_at,
            completed_at: self.completed_at,
        }
    }

    fn ensure_live(&self) -> Result<()> {
        if self.status.is_terminal() {
            return Err(AppError::StateViolation(format!(
                "agent {} is already {:?}",
                self.session_id, self.status
            )));
        }
        Ok(())
    }
}

/// Read-only view of an agent handle.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AgentSnapshot {
    /// Session id.
    pub session_id: String,
    /// Kind of agent.
    pub agent_type: AgentType,
    /// Current status.
    pub status: AgentStatus,
    /// Handle creation time.
    pub started_at: DateTime<Utc>,
    /// Time a terminal status was reached.
    pub completed_at: Option<DateTime<Utc>>,
}

/// Parameters of a spawn call.
#[derive(Debug, Clone, Default)]
pub struct SpawnRequest {
    /// Requested agent type, validated against [`AgentType`].
    pub agent_type: String,
    /// Prompt given to every spawned session.
    pub prompt: String,
    /// Number of independent sessions to create.
    pub count: u32,
    /// Session that requested the spawn.
    pub parent_session_id: Option<String>,
    /// Metadata copied onto every session.
    pub metadata: Metadata,
}

/// Result of a single-session wait poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The agent reached a terminal status.
    Terminal(AgentStatus),
    /// The wait bound elapsed first.
    TimedOut,
    /// The agent left the active set.
    NotFound,
}

type SharedWait = Shared<BoxFuture<'static, WaitOutcome>>;

/// Tunables for an [`AgentManager`].
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    /// Instance owning the sessions.
    pub instance_id: String,
    /// Interval between wait polls.
    pub poll_interval: Duration,
    /// Upper bound on `count` for one spawn.
    pub max_spawn_count: u32,
}

struct Inner {
    agents: Mutex<HashMap<String, Agent>>,
    pending_waits: Mutex<HashMap<String, SharedWait>>,
    sessions: SessionRepo,
    log: Arc<SessionLogStore>,
    clock: Arc<dyn Clock>,
    settings: ManagerSettings,
}

/// Supervisor of the agents of one wrapper instance.
#[derive(Clone)]
pub struct AgentManager {
    inner: Arc<Inner>,
}

impl AgentManager {
    /// Create an empty manager.
    #[must_use]
    pub fn new(
        sessions: SessionRepo,
        log: Arc<SessionLogStore>,
        clock: Arc<dyn Clock>,
        settings: ManagerSettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                agents: Mutex::new(HashMap::new()),
                pending_waits: Mutex::new(HashMap::new()),
                sessions,
                log,
                clock,
                settings,
            }),
        }
    }

    /// Clock used by the manager's polling loops.
    #[must_use]
    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.inner.clock)
    }

    /// Interval between wait polls.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        self.inner.settings.poll_interval
    }

    /// Session repository the manager writes through.
    #[must_use]
    pub fn sessions(&self) -> &SessionRepo {
        &self.inner.sessions
    }

    /// Rebuild the active set from this instance's non-terminal sessions.
    ///
    /// Backends die with the process that launched them, so every restored
    /// handle is settled as interrupted in the store and in memory. Returns
    /// the number of handles added.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the sessions cannot be read or settled.
    pub async fn load_active_agents(&self) -> Result<usize> {
        let instance_id = &self.inner.settings.instance_id;
        let sessions = self
            .inner
            .sessions
            .list_non_terminal_for_instance(instance_id)
            .await?;

        let mut agents = self.inner.agents.lock().await;
        let mut added = 0;
        for session in sessions {
            if agents.contains_key(&session.id) {
                continue;
            }
            self.inner
                .sessions
                .finish(&session.id, SessionStatus::Interrupted, None)
                .await?;
            self.inner.log.append_or_warn(
                &session.id,
                LogEvent::System {
                    message: format!("interrupted: backend lost when instance {instance_id} restarted"),
                },
            );

            let mut agent = Agent::new(&session.id, session.agent_type, AgentStatus::Interrupted);
            agent.cancel.cancel();
            agent.started_at = session.created_at;
            agent.completed_at = Some(Utc::now());
            agents.insert(session.id.clone(), agent);
            added += 1;
        }
        info!(added, "active agents loaded from store");
        Ok(added)
    }

    /// Settle non-terminal sessions whose owning instance is neither this
    /// one nor in `live_instances`. Returns the number settled.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the sessions cannot be read.
    pub async fn settle_orphaned_sessions(&self, live_instances: &HashSet<String>) -> Result<usize> {
        let own = &self.inner.settings.instance_id;
        let orphans = self
            .inner
            .sessions
            .list_non_terminal()
            .await?
            .into_iter()
            .filter(|s| match s.instance_id.as_deref() {
                Some(owner) => owner != own && !live_instances.contains(owner),
                None => true,
            });

        let mut settled = 0;
        for session in orphans {
            let owner = session.instance_id.as_deref().unwrap_or("unknown");
            match self
                .inner
                .sessions
                .finish(&session.id, SessionStatus::Interrupted, None)
                .await
            {
                Ok(_) => {
                    self.inner.log.append_or_warn(
                        &session.id,
                        LogEvent::System {
                            message: format!("interrupted: owning instance {owner} is no longer running"),
                        },
                    );
                    settled += 1;
                }
                Err(AppError::StateViolation(_)) => {
                    debug!(session_id = %session.id, "session finished concurrently");
                }
                Err(err) => return Err(err),
            }
        }
        if settled > 0 {
            info!(settled, "orphaned sessions settled");
        }
        Ok(settled)
    }

    /// Create `count` sessions and their running agent handles.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Validation` for an unknown agent type or a count
    /// outside `1..=max_spawn_count`, `AppError::NotFound` for a missing
    /// parent session, or a persistence error.
    pub async fn spawn(&self, request: SpawnRequest) -> Result<Vec<String>> {
        let agent_type: AgentType = request.agent_type.parse()?;
        let max = self.inner.settings.max_spawn_count;
        if request.count == 0 || request.count > max {
            return Err(AppError::Validation(format!(
                "count must be between 1 and {max}, got {}",
                request.count
            )));
        }
        if let Some(ref parent) = request.parent_session_id {
            self.inner.sessions.require(parent).await?;
        }

        let span = info_span!("spawn_agents", %agent_type, count = request.count);
        async move {
            let mut agents = self.inner.agents.lock().await;
            let mut ids = Vec::with_capacity(request.count as usize);

            for _ in 0..request.count {
                let mut session = Session::new(
                    agent_type,
                    request.prompt.clone(),
                    request.parent_session_id.clone(),
                );
                session.instance_id = Some(self.inner.settings.instance_id.clone());
                session.metadata.clone_from(&request.metadata);
                self.inner.sessions.create(&session).await?;

                let mut agent = Agent::new(&session.id, agent_type, AgentStatus::Idle);
                self.inner.log.append_or_warn(
                    &session.id,
                    LogEvent::System {
                        message: format!("spawned {agent_type} agent"),
                    },
                );
                self.inner.log.append_or_warn(
                    &session.id,
                    LogEvent::User {
                        message: request.prompt.clone(),
                    },
                );

                self.inner
                    .sessions
                    .update_status(&session.id, SessionStatus::Running)
                    .await?;
                agent.status = AgentStatus::Running;

                info!(session_id = %session.id, "agent spawned");
                agents.insert(session.id.clone(), agent);
                ids.push(session.id);
            }

            Ok(ids)
        }
        .instrument(span)
        .await
    }

    /// Cancel an agent cooperatively and mark it interrupted.
    ///
    /// Once this returns, readers observe `Interrupted`; the execution loop
    /// may still be winding down.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if no handle exists and
    /// `AppError::StateViolation` if the agent is already terminal.
    pub async fn interrupt(&self, session_id: &str, signal: Option<&str>) -> Result<()> {
        let mut agents = self.inner.agents.lock().await;
        let agent = agents
            .get_mut(session_id)
            .ok_or_else(|| AppError::NotFound(format!("agent {session_id} not found")))?;
        agent.ensure_live()?;

        self.inner
            .sessions
            .finish(session_id, SessionStatus::Interrupted, None)
            .await?;

        agent.cancel.cancel();
        agent.status = AgentStatus::Interrupted;
        agent.completed_at = Some(Utc::now());

        let signal = signal.unwrap_or("interrupt");
        self.inner.log.append_or_warn(
            session_id,
            LogEvent::System {
                message: format!("interrupted ({signal})"),
            },
        );
        info!(session_id, signal, "agent interrupted");
        Ok(())
    }

    /// Mark an agent done and persist its result.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if no handle exists and
    /// `AppError::StateViolation` if the agent is already terminal.
    pub async fn complete_agent(&self, session_id: &str, result: &str) -> Result<()> {
        self.finish(
            session_id,
            AgentStatus::Done,
            SessionStatus::Done,
            LogEvent::Result {
                text: result.to_owned(),
            },
            result,
        )
        .await
    }

    /// Mark an agent failed and persist the error.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if no handle exists and
    /// `AppError::StateViolation` if the agent is already terminal.
    pub async fn fail_agent(&self, session_id: &str, error: &str) -> Result<()> {
        self.finish(
            session_id,
            AgentStatus::Failed,
            SessionStatus::Failed,
            LogEvent::Error {
                message: error.to_owned(),
            },
            error,
        )
        .await
    }

    async fn finish(
        &self,
        session_id: &str,
        status: AgentStatus,
        session_status: SessionStatus,
        event: LogEvent,
        text: &str,
    ) -> Result<()> {
        let mut agents = self.inner.agents.lock().await;
        let agent = agents
            .get_mut(session_id)
            .ok_or_else(|| AppError::NotFound(format!("agent {session_id} not found")))?;
        agent.ensure_live()?;

        self.inner
            .sessions
            .finish(session_id, session_status, Some(text.to_owned()))
            .await?;

        agent.status = status;
        agent.completed_at = Some(Utc::now());
        self.inner.log.append_or_warn(session_id, event);
        info!(session_id, ?status, "agent finished");
        Ok(())
    }

    /// Wait until the agent reaches a terminal status.
    ///
    /// Concurrent waits on the same session share one poll loop. The bound
    /// is measured from the start of that loop.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Timeout` if `max_wait` elapses first and
    /// `AppError::NotFound` if the agent is missing or leaves the active set.
    pub async fn wait(&self, session_id: &str, max_wait: Duration) -> Result<AgentStatus> {
        let shared = {
            let mut pending = self.inner.pending_waits.lock().await;
            if let Some(existing) = pending.get(session_id) {
                debug!(session_id, "joining pending wait");
                existing.clone()
            } else {
                let started = self.inner.clock.now();
                let handle = tokio::spawn(poll_until_terminal(
                    Arc::clone(&self.inner),
                    session_id.to_owned(),
                    started,
                    max_wait,
                ));
                let shared = async move { handle.await.unwrap_or(WaitOutcome::NotFound) }
                    .boxed()
                    .shared();
                pending.insert(session_id.to_owned(), shared.clone());
                shared
            }
        };

        match shared.await {
            WaitOutcome::Terminal(status) => Ok(status),
            WaitOutcome::TimedOut => Err(AppError::Timeout(format!(
                "agent {session_id} not finished after {}ms",
                max_wait.as_millis()
            ))),
            WaitOutcome::NotFound => Err(AppError::NotFound(format!(
                "agent {session_id} not found"
            ))),
        }
    }

    /// Number of sessions with a poll loop in flight.
    pub async fn pending_wait_count(&self) -> usize {
        self.inner.pending_waits.lock().await.len()
    }

    /// Log a user message and queue it for the execution loop.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if no handle exists and
    /// `AppError::StateViolation` if the agent is already terminal.
    pub async fn deliver_message(&self, session_id: &str, text: &str) -> Result<()> {
        let agents = self.inner.agents.lock().await;
        let agent = agents
            .get(session_id)
            .ok_or_else(|| AppError::NotFound(format!("agent {session_id} not found")))?;
        agent.ensure_live()?;

        self.inner.log.append(
            session_id,
            LogEvent::User {
                message: text.to_owned(),
            },
        )?;
        if agent.inbox_tx.send(text.to_owned()).is_err() {
            warn!(session_id, "execution loop no longer reads messages");
        }
        info!(session_id, "message delivered");
        Ok(())
    }

    /// Hand the agent's message inbox to its execution loop. Only one
    /// loop may attach.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if no handle exists and
    /// `AppError::StateViolation` if the inbox was already taken.
    pub async fn take_inbox(&self, session_id: &str) -> Result<mpsc::UnboundedReceiver<String>> {
        let mut agents = self.inner.agents.lock().await;
        let agent = agents
            .get_mut(session_id)
            .ok_or_else(|| AppError::NotFound(format!("agent {session_id} not found")))?;
        agent.inbox_rx.take().ok_or_else(|| {
            AppError::StateViolation(format!("agent {session_id} already has an execution loop"))
        })
    }

    /// Cancellation token of an agent.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if no handle exists.
    pub async fn cancellation_token(&self, session_id: &str) -> Result<CancellationToken> {
        self.inner
            .agents
            .lock()
            .await
            .get(session_id)
            .map(|a| a.cancel.clone())
            .ok_or_else(|| AppError::NotFound(format!("agent {session_id} not found")))
    }

    /// Snapshot of one agent.
    pub async fn snapshot(&self, session_id: &str) -> Option<AgentSnapshot> {
        self.inner
            .agents
            .lock()
            .await
            .get(session_id)
            .map(Agent::snapshot)
    }

    /// Snapshots of every agent, oldest first.
    pub async fn snapshots(&self) -> Vec<AgentSnapshot> {
        let mut all: Vec<AgentSnapshot> = self
            .inner
            .agents
            .lock()
            .await
            .values()
            .map(Agent::snapshot)
            .collect();
        all.sort_by_key(|a| a.started_at);
        all
    }

    /// Drop an agent from the active set.
    pub async fn remove(&self, session_id: &str) -> Option<AgentSnapshot> {
        let removed = self.inner.agents.lock().await.remove(session_id);
        removed.map(|agent| agent.snapshot())
    }

    /// Interrupt every live agent. Returns how many were interrupted.
    pub async fn interrupt_all(&self, signal: &str) -> usize {
        let live: Vec<String> = self
            .inner
            .agents
            .lock()
            .await
            .values()
            .filter(|a| !a.status.is_terminal())
            .map(|a| a.session_id.clone())
            .collect();

        let mut interrupted = 0;
        for session_id in live {
            match self.interrupt(&session_id, Some(signal)).await {
                Ok(()) => interrupted += 1,
                Err(err) => warn!(%session_id, %err, "failed to interrupt agent"),
            }
        }
        interrupted
    }
}

async fn poll_until_terminal(
    inner: Arc<Inner>,
    session_id: String,
    started: Duration,
    max_wait: Duration,
) -> WaitOutcome {
    let outcome = loop {
        let status = inner.agents.lock().await.get(&session_id).map(|a| a.status);
        match status {
            None => break WaitOutcome::NotFound,
            Some(status) if status.is_terminal() => break WaitOutcome::Terminal(status),
            Some(_) => {}
        }
        if inner.clock.now().saturating_sub(started) >= max_wait {
            break WaitOutcome::TimedOut;
        }
        inner.clock.sleep(inner.settings.poll_interval).await;
    };

    inner.pending_waits.lock().await.remove(&session_id);
    debug!(%session_id, ?outcome, "wait resolved");
    outcome
}

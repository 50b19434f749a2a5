//! Session repository for `SQLite` persistence.

use std::sync::Arc;

use chrono::Utc;

use crate::models::agent::AgentType;
use crate::models::session::{Metadata, Session, SessionStatus};
use crate::{AppError, Result};

use super::db::Database;
use super::{parse_optional_timestamp, parse_timestamp};

/// Repository wrapper around `SQLite` for session records.
#[derive(Clone)]
pub struct SessionRepo {
    db: Arc<Database>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct SessionRow {
    id: String,
    claude_session_id: Option<String>,
    agent_type: String,
    parent_session_id: Option<String>,
    instance_id: Option<String>,
    status: String,
    prompt: String,
    result: Option<String>,
    metadata: String,
    archived: i64,
    created_at: String,
    updated_at: String,
    completed_at: Option<String>,
}

impl SessionRow {
    fn into_session(self) -> Result<Session> {
        let agent_type: AgentType = self
            .agent_type
            .parse()
            .map_err(|_| AppError::Db(format!("invalid agent_type: {}", self.agent_type)))?;
        let metadata: Metadata = serde_json::from_str(&self.metadata)
            .map_err(|e| AppError::Db(format!("invalid metadata: {e}")))?;

        Ok(Session {
            id: self.id,
            claude_session_id: self.claude_session_id,
            agent_type,
            parent_session_id: self.parent_session_id,
            instance_id: self.instance_id,
            status: parse_status(&self.status)?,
            prompt: self.prompt,
            result: self.result,
            metadata,
            archived: self.archived != 0,
            created_at: parse_timestamp("created_at", &self.created_at)?,
            updated_at: parse_timestamp("updated_at", &self.updated_at)?,
            completed_at: parse_optional_timestamp("completed_at", self.completed_at.as_deref())?,
        })
    }
}

fn parse_status(s: &str) -> Result<SessionStatus> {
    match s {
        "created" => Ok(SessionStatus::Created),
        "running" => Ok(SessionStatus::Running),
        "done" => Ok(SessionStatus::Done),
        "completed" => Ok(SessionStatus::Completed),
        "failed" => Ok(SessionStatus::Failed),
        "interrupted" => Ok(SessionStatus::Interrupted),
        other => Err(AppError::Db(format!("invalid session status: {other}"))),
    }
}

impl SessionRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert a new session record.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the insert fails, including when the parent
    /// session does not exist.
    pub async fn create(&self, session: &Session) -> Result<Session> {
        let metadata = serde_json::to_string(&session.metadata)
            .map_err(|e| AppError::Db(format!("serialize metadata: {e}")))?;

        sqlx::query(
            "INSERT INTO session (id, claude_session_id, agent_type, parent_session_id,
             instance_id, status, prompt, result, metadata, archived, created_at,
             updated_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        )
        .bind(&session.id)
        .bind(&session.claude_session_id)
        .bind(session.agent_type.as_str())
        .bind(&session.parent_session_id)
        .bind(&session.instance_id)
        .bind(session.status.as_str())
        .bind(&session.prompt)
        .bind(&session.result)
        .bind(&metadata)
        .bind(i64::from(session.archived))
        .bind(session.created_at.to_rfc3339())
        .bind(session.updated_at.to_rfc3339())
        .bind(session.completed_at.map(|t| t.to_rfc3339()))
        .execute(self.db.as_ref())
        .await?;

        Ok(session.clone())
    }

    /// Retrieve a session by identifier.
    ///
    /// Returns `Ok(None)` if the session does not exist.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_by_id(&self, id: &str) -> Result<Option<Session>> {
        let row: Option<SessionRow> = sqlx::query_as("SELECT * FROM session WHERE id = ?1")
            .bind(id)
            .fetch_optional(self.db.as_ref())
            .await?;

        row.map(SessionRow::into_session).transpose()
    }

    /// Retrieve a session that must exist.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the session does not exist.
    pub async fn require(&self, id: &str) -> Result<Session> {
        self.get_by_id(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("session {id} not found")))
    }

    /// Move a session to a non-terminal status, respecting the state machine.
    ///
    /// # Errors
    ///
    /// Returns `AppError::StateViolation` if the transition is not permitted.
    pub async fn update_status(&self, id: &str, status: SessionStatus) -> Result<Session> {
        let mut current = self.require(id).await?;
        if !current.can_transition_to(status) {
            return Err(AppError::StateViolation(format!(
                "session {id} cannot move from {} to {}",
                current.status.as_str(),
                status.as_str()
            )));
        }

        current.status = status;
        current.updated_at = Utc::now();
        if status.is_terminal() {
            current.completed_at = Some(current.updated_at);
        }
        self.write_status(&current).await?;
        Ok(current)
    }

    /// Move a session to a terminal status and record its result.
    ///
    /// # Errors
    ///
    /// Returns `AppError::StateViolation` if the session is already terminal
    /// or `status` is not terminal.
    pub async fn finish(
        &self,
        id: &str,
        status: SessionStatus,
        result: Option<String>,
    ) -> Result<Session> {
        if !status.is_terminal() {
            return Err(AppError::StateViolation(format!(
                "{} is not a terminal status",
                status.as_str()
            )));
        }
        let mut current = self.require(id).await?;
        if !current.can_transition_to(status) {
            return Err(AppError::StateViolation(format!(
                "session {id} cannot move from {} to {}",
                current.status.as_str(),
                status.as_str()
            )));
        }

        let now = Utc::now();
        current.status = status;
        current.result = result;
        current.updated_at = now;
        current.completed_at = Some(now);
        self.write_status(&current).await?;
        Ok(current)
    }

    async fn write_status(&self, session: &Session) -> Result<()> {
        sqlx::query(
            "UPDATE session SET status = ?1, result = ?2, updated_at = ?3, completed_at = ?4
             WHERE id = ?5",
        )
        .bind(session.status.as_str())
        .bind(&session.result)
        .bind(session.updated_at.to_rfc3339())
        .bind(session.completed_at.map(|t| t.to_rfc3339()))
        .bind(&session.id)
        .execute(self.db.as_ref())
        .await?;
        Ok(())
    }

    /// Record the backend's correlation id.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the session does not exist.
    pub async fn set_claude_session_id(&self, id: &str, claude_session_id: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE session SET claude_session_id = ?1, updated_at = ?2 WHERE id = ?3",
        )
        .bind(claude_session_id)
        .bind(Utc::now().to_rfc3339())
        .bind(id)
        .execute(self.db.as_ref())
        .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("session {id} not found")));
        }
        Ok(())
    }

    /// Merge keys into a session's metadata.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the session does not exist.
    pub async fn merge_metadata(&self, id: &str, entries: Metadata) -> Result<Session> {
        let mut current = self.require(id).await?;
        current.metadata.extend(entries);
        current.updated_at = Utc::now();
        let metadata = serde_json::to_string(&current.metadata)
            .map_err(|e| AppError::Db(format!("serialize metadata: {e}")))?;

        sqlx::query("UPDATE session SET metadata = ?1, updated_at = ?2 WHERE id = ?3")
            .bind(&metadata)
            .bind(current.updated_at.to_rfc3339())
            .bind(id)
            .execute(self.db.as_ref())
            .await?;
        Ok(current)
    }

    /// Sessions of an instance that have not reached a terminal status.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_non_terminal_for_instance(&self, instance_id: &str) -> Result<Vec<Session>> {
        let rows: Vec<SessionRow> = sqlx::query_as(
            "SELECT * FROM session
             WHERE instance_id = ?1 AND status IN ('created', 'running')
             ORDER BY created_at ASC",
        )
        .bind(instance_id)
        .fetch_all(self.db.as_ref())
        .await?;

        rows.into_iter().map(SessionRow::into_session).collect()
    }

    /// Sessions of every instance that have not reached a terminal status.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_non_terminal(&self) -> Result<Vec<Session>> {
        let rows: Vec<SessionRow> = sqlx::query_as(
            "SELECT * FROM session WHERE status IN ('created', 'running') ORDER BY created_at ASC",
        )
        .fetch_all(self.db.as_ref())
        .await?;

        rows.into_iter().map(SessionRow::into_session).collect()
    }

    /// Direct children of a session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_children(&self, parent_session_id: &str) -> Result<Vec<Session>> {
        let rows: Vec<SessionRow> = sqlx::query_as(
            "SELECT * FROM session WHERE parent_session_id = ?1 ORDER BY created_at ASC",
        )
        .bind(parent_session_id)
        .fetch_all(self.db.as_ref())
        .await?;

        rows.into_iter().map(SessionRow::into_session).collect()
    }

    /// Non-archived sessions, most recent first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_recent(&self, limit: u32) -> Result<Vec<Session>> {
        let rows: Vec<SessionRow> = sqlx::query_as(
            "SELECT * FROM session WHERE archived = 0 ORDER BY created_at DESC LIMIT ?1",
        )
        .bind(i64::from(limit))
        .fetch_all(self.db.as_ref())
        .await?;

        rows.into_iter().map(SessionRow::into_session).collect()
    }

    /// Archive a terminal session in place.
    ///
    /// # Errors
    ///
    /// Returns `AppError::StateViolation` if the session is still live.
    pub async fn archive(&self, id: &str) -> Result<()> {
        let current = self.require(id).await?;
        if !current.status.is_terminal() {
            return Err(AppError::StateViolation(format!(
                "session {id} is still {}",
                current.status.as_str()
            )));
        }
        sqlx::query("UPDATE session SET archived = 1, updated_at = ?1 WHERE id = ?2")
            .bind(Utc::now().to_rfc3339())
            .bind(id)
            .execute(self.db.as_ref())
            .await?;
        Ok(())
    }

    /// Archive the finished sessions among the `limit` most recent
    /// non-archived ones. Returns the archived ids.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if a query fails.
    pub async fn archive_finished(&self, limit: u32) -> Result<Vec<String>> {
        let mut archived = Vec::new();
        for session in self.list_recent(limit).await? {
            if session.status.is_terminal() {
                self.archive(&session.id).await?;
                archived.push(session.id);
            }
        }
        Ok(archived)
    }
}

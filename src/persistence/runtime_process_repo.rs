//! Runtime process repository for `SQLite` persistence.

use std::sync::Arc;

use chrono::Utc;

use crate::models::runtime_process::{ProcessKind, RuntimeProcess};
use crate::runtime::RuntimeKind;
use crate::{AppError, Result};

use super::db::Database;
use super::{parse_optional_timestamp, parse_timestamp};

/// Repository for processes bound to sessions.
#[derive(Clone)]
pub struct RuntimeProcessRepo {
    db: Arc<Database>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct RuntimeProcessRow {
    id: String,
    session_id: String,
    pid: i64,
    kind: String,
    runtime: Option<String>,
    started_at: String,
    exited_at: Option<String>,
    exit_code: Option<i64>,
    is_current: i64,
}

impl RuntimeProcessRow {
    fn into_process(self) -> Result<RuntimeProcess> {
        let pid = u32::try_from(self.pid)
            .map_err(|_| AppError::Db(format!("invalid pid: {}", self.pid)))?;
        let runtime = self
            .runtime
            .as_deref()
            .map(str::parse::<RuntimeKind>)
            .transpose()
            .map_err(|e| AppError::Db(format!("invalid runtime: {e}")))?;
        let exit_code = self
            .exit_code
            .map(i32::try_from)
            .transpose()
            .map_err(|_| AppError::Db("invalid exit_code".into()))?;

        Ok(RuntimeProcess {
            id: self.id,
            session_id: self.session_id,
            pid,
            kind: parse_kind(&self.kind)?,
            runtime,
            started_at: parse_timestamp("started_at", &self.started_at)?,
            exited_at: parse_optional_timestamp("exited_at", self.exited_at.as_deref())?,
            exit_code,
            is_current: self.is_current != 0,
        })
    }
}

fn parse_kind(s: &str) -> Result<ProcessKind> {
    match s {
        "wrapper" => Ok(ProcessKind::Wrapper),
        "backend" => Ok(ProcessKind::Backend),
        "sdk" => Ok(ProcessKind::Sdk),
        other => Err(AppError::Db(format!("invalid process kind: {other}"))),
    }
}

impl RuntimeProcessRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert `process` as the session's current process.
    ///
    /// Clears `is_current` on every earlier row of the session in the same
    /// transaction.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the transaction fails.
    pub async fn create_current(&self, process: &RuntimeProcess) -> Result<RuntimeProcess> {
        let mut tx = self.db.begin().await?;

        sqlx::query("UPDATE runtime_process SET is_current = 0 WHERE session_id = ?1")
            .bind(&process.session_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            "INSERT INTO runtime_process (id, session_id, pid, kind, runtime, started_at,
             exited_at, exit_code, is_current)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 1)",
        )
        .bind(&process.id)
        .bind(&process.session_id)
        .bind(i64::from(process.pid))
        .bind(process.kind.as_str())
        .bind(process.runtime.map(RuntimeKind::as_str))
        .bind(process.started_at.to_rfc3339())
        .bind(process.exited_at.map(|t| t.to_rfc3339()))
        .bind(process.exit_code)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        let mut stored = process.clone();
        stored.is_current = true;
        Ok(stored)
    }

    /// Record a process exit.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the process record does not exist.
    pub async fn mark_exited(&self, id: &str, exit_code: Option<i32>) -> Result<()> {
        let result = sqlx::query(
            "UPDATE runtime_process SET exited_at = ?1, exit_code = ?2
             WHERE id = ?3 AND exited_at IS NULL",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(exit_code)
        .bind(id)
        .execute(self.db.as_ref())
        .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!(
                "running process record {id} not found"
            )));
        }
        Ok(())
    }

    /// Current process of a session, if any.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_current(&self, session_id: &str) -> Result<Option<RuntimeProcess>> {
        let row: Option<RuntimeProcessRow> = sqlx::query_as(
            "SELECT * FROM runtime_process WHERE session_id = ?1 AND is_current = 1",
        )
        .bind(session_id)
        .fetch_optional(self.db.as_ref())
        .await?;

        row.map(RuntimeProcessRow::into_process).transpose()
    }

    /// Every process of a session, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn list_for_session(&self, session_id: &str) -> Result<Vec<RuntimeProcess>> {
        let rows: Vec<RuntimeProcessRow> = sqlx::query_as(
            "SELECT * FROM runtime_process WHERE session_id = ?1 ORDER BY started_at ASC",
        )
        .bind(session_id)
        .fetch_all(self.db.as_ref())
        .await?;

        rows.into_iter().map(RuntimeProcessRow::into_process).collect()
    }
}

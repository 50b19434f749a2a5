//! Instance repository mirroring registry entries into `SQLite`.
//!
//! The registry document stays authoritative for reachability; these rows
//! keep instance history next to the sessions the instances supervised.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;

use crate::registry::InstanceRegistryEntry;
use crate::{AppError, Result};

use super::db::Database;
use super::{parse_optional_timestamp, parse_timestamp};

/// Repository for wrapper instance records.
#[derive(Clone)]
pub struct InstanceRepo {
    db: Arc<Database>,
}

/// Internal row struct for `SQLite` deserialization.
#[derive(sqlx::FromRow)]
struct InstanceRow {
    id: String,
    pid: i64,
    tty: Option<String>,
    project_hash: String,
    project_root: String,
    socket_path: String,
    started_at: String,
    updated_at: String,
    ended_at: Option<String>,
    exit_code: Option<i64>,
}

impl InstanceRow {
    fn into_entry(self) -> Result<InstanceRegistryEntry> {
        Ok(InstanceRegistryEntry {
            instance_id: self.id,
            pid: u32::try_from(self.pid)
                .map_err(|_| AppError::Db(format!("invalid pid: {}", self.pid)))?,
            tty: self.tty,
            project_hash: self.project_hash,
            project_root: PathBuf::from(self.project_root),
            socket_path: PathBuf::from(self.socket_path),
            started_at: parse_timestamp("started_at", &self.started_at)?,
            updated_at: parse_timestamp("updated_at", &self.updated_at)?,
            ended_at: parse_optional_timestamp("ended_at", self.ended_at.as_deref())?,
            exit_code: self
                .exit_code
                .map(i32::try_from)
                .transpose()
                .map_err(|_| AppError::Db("invalid exit_code".into()))?,
        })
    }
}

impl InstanceRepo {
    /// Create a new repository instance.
    #[must_use]
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert or replace an instance row.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the write fails.
    pub async fn upsert(&self, entry: &InstanceRegistryEntry) -> Result<()> {
        sqlx::query(
            "INSERT INTO instance (id, pid, tty, project_hash, project_root, socket_path,
             started_at, updated_at, ended_at, exit_code)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(id) DO UPDATE SET
                pid = excluded.pid,
                tty = excluded.tty,
                socket_path = excluded.socket_path,
                started_at = excluded.started_at,
                updated_at = excluded.updated_at,
                ended_at = excluded.ended_at,
                exit_code = excluded.exit_code",
        )
        .bind(&entry.instance_id)
        .bind(i64::from(entry.pid))
        .bind(&entry.tty)
        .bind(&entry.project_hash)
        .bind(entry.project_root.to_string_lossy().into_owned())
        .bind(entry.socket_path.to_string_lossy().into_owned())
        .bind(entry.started_at.to_rfc3339())
        .bind(entry.updated_at.to_rfc3339())
        .bind(entry.ended_at.map(|t| t.to_rfc3339()))
        .bind(entry.exit_code)
        .execute(self.db.as_ref())
        .await?;
        Ok(())
    }

    /// Record an instance end, keeping an earlier `ended_at`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if the instance row does not exist.
    pub async fn mark_ended(&self, id: &str, exit_code: Option<i32>) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "UPDATE instance SET ended_at = COALESCE(ended_at, ?1), exit_code = ?2,
             updated_at = ?1 WHERE id = ?3",
        )
        .bind(&now)
        .bind(exit_code)
        .bind(id)
        .execute(self.db.as_ref())
        .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("instance {id} not found")));
        }
        Ok(())
    }

    /// Retrieve an instance row.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Db` if the query fails.
    pub async fn get_by_id(&self, id: &str) -> Result<Option<InstanceRegistryEntry>> {
        let row: Option<InstanceRow> = sqlx::query_as("SELECT * FROM instance WHERE id = ?1")
            .bind(id)
            .fetch_optional(self.db.as_ref())
            .await?;
        row.map(InstanceRow::into_entry).transpose()
    }
}

//! `SQLite` schema bootstrap logic.
//!
//! All table definitions use `CREATE TABLE IF NOT EXISTS` and are safe to
//! re-run on every instance startup.

use sqlx::SqlitePool;

use crate::Result;

/// Apply all table definitions to the connected `SQLite` database.
///
/// # Errors
///
/// Returns `AppError::Db` if any DDL statement fails.
pub async fn bootstrap_schema(pool: &SqlitePool) -> Result<()> {
    let ddl = r"
CREATE TABLE IF NOT EXISTS session (
    id                TEXT PRIMARY KEY NOT NULL,
    claude_session_id TEXT,
    agent_type        TEXT NOT NULL,
    parent_session_id TEXT REFERENCES session(id),
    instance_id       TEXT,
    status            TEXT NOT NULL CHECK(status IN ('created','running','done','completed','failed','interrupted')),
    prompt            TEXT NOT NULL,
    result            TEXT,
    metadata          TEXT NOT NULL DEFAULT '{}',
    archived          INTEGER NOT NULL DEFAULT 0,
    created_at        TEXT NOT NULL,
    updated_at        TEXT NOT NULL,
    completed_at      TEXT
);

CREATE TABLE IF NOT EXISTS runtime_process (
    id          TEXT PRIMARY KEY NOT NULL,
    session_id  TEXT NOT NULL REFERENCES session(id),
    pid         INTEGER NOT NULL,
    kind        TEXT NOT NULL CHECK(kind IN ('wrapper','backend','sdk')),
    runtime     TEXT,
    started_at  TEXT NOT NULL,
    exited_at   TEXT,
    exit_code   INTEGER,
    is_current  INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS instance (
    id            TEXT PRIMARY KEY NOT NULL,
    pid           INTEGER NOT NULL,
    tty           TEXT,
    project_hash  TEXT NOT NULL,
    project_root  TEXT NOT NULL,
    socket_path   TEXT NOT NULL,
    started_at    TEXT NOT NULL,
    updated_at    TEXT NOT NULL,
    ended_at      TEXT,
    exit_code     INTEGER
);

CREATE INDEX IF NOT EXISTS idx_session_parent ON session(parent_session_id);
CREATE INDEX IF NOT EXISTS idx_session_instance ON session(instance_id, status);
CREATE INDEX IF NOT EXISTS idx_runtime_process_session ON runtime_process(session_id);
CREATE UNIQUE INDEX IF NOT EXISTS idx_runtime_process_current
    ON runtime_process(session_id) WHERE is_current = 1;
";

    sqlx::raw_sql(ddl).execute(pool).await?;
    Ok(())
}

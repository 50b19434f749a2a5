//! Append-only per-session execution logs.
//!
//! Each session gets `<log_dir>/<session_id>.jsonl`, one [`LogEntry`] per
//! line. The lifecycle component and the executor append; [`summary`]
//! reads the log back to describe a session's progress.

pub mod summary;

use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{AppError, Result};

pub use summary::{summarize, SessionProgress};

/// Structured content of one log record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LogEvent {
    /// Lifecycle bookkeeping.
    System {
        /// Message text.
        message: String,
    },
    /// Prompt or message from the user.
    User {
        /// Message text.
        message: String,
    },
    /// A line of backend output.
    Output {
        /// Output text.
        text: String,
    },
    /// The backend modified an existing file.
    FileEdited {
        /// File path.
        path: String,
    },
    /// The backend created a file.
    FileCreated {
        /// File path.
        path: String,
    },
    /// Execution error.
    Error {
        /// Error text.
        message: String,
    },
    /// Final response of the session.
    Result {
        /// Response text.
        text: String,
    },
}

/// One timestamped log record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LogEntry {
    /// Time the record was written.
    pub timestamp: DateTime<Utc>,
    /// Record content.
    #[serde(flatten)]
    pub event: LogEvent,
}

impl LogEntry {
    /// Stamp an event with the current time.
    #[must_use]
    pub fn now(event: LogEvent) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
        }
    }
}

/// Directory of session logs.
#[derive(Debug)]
pub struct SessionLogStore {
    log_dir: PathBuf,
    write_lock: Mutex<()>,
}

impl SessionLogStore {
    /// Construct a store that keeps logs in `log_dir`.
    ///
    /// Creates `log_dir` and all parent directories if they do not exist.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the directory cannot be created.
    pub fn new(log_dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&log_dir).map_err(|e| {
            AppError::Io(format!(
                "failed to create session log directory {}: {e}",
                log_dir.display()
            ))
        })?;
        Ok(Self {
            log_dir,
            write_lock: Mutex::new(()),
        })
    }

    /// Directory holding the logs.
    #[must_use]
    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    /// Log file of a session.
    #[must_use]
    pub fn path(&self, session_id: &str) -> PathBuf {
        self.log_dir.join(format!("{session_id}.jsonl"))
    }

    /// Append one event to a session's log.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the record cannot be written.
    pub fn append(&self, session_id: &str, event: LogEvent) -> Result<()> {
        let entry = LogEntry::now(event);
        let line = serde_json::to_string(&entry)
            .map_err(|e| AppError::Io(format!("failed to serialize log entry: {e}")))?;

        let _guard = self
            .write_lock
            .lock()
            .map_err(|_| AppError::Io("session log mutex poisoned".into()))?;

        let path = self.path(session_id);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| AppError::Io(format!("failed to open {}: {e}", path.display())))?;
        writeln!(file, "{line}")
            .and_then(|()| file.flush())
            .map_err(|e| AppError::Io(format!("failed to append to {}: {e}", path.display())))?;
        Ok(())
    }

    /// Append, logging instead of failing. For paths where the log is
    /// advisory and the state change must go ahead.
    pub fn append_or_warn(&self, session_id: &str, event: LogEvent) {
        if let Err(err) = self.append(session_id, event) {
            warn!(session_id, %err, "failed to append session log entry");
        }
    }

    /// Read every parsable record of a session's log. Unparsable lines are
    /// skipped; a missing log reads as empty.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the file exists but cannot be read.
    pub fn read(&self, session_id: &str) -> Result<Vec<LogEntry>> {
        let path = self.path(session_id);
        let file = match fs::File::open(&path) {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(AppError::Io(format!(
                    "failed to open {}: {err}",
                    path.display()
                )))
            }
        };

        let mut entries = Vec::new();
        for line in BufReader::new(file).lines() {
            let line =
                line.map_err(|e| AppError::Io(format!("failed to read {}: {e}", path.display())))?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<LogEntry>(&line) {
                Ok(entry) => entries.push(entry),
                Err(err) => warn!(session_id, %err, "skipping malformed session log line"),
            }
        }
        Ok(entries)
    }
}

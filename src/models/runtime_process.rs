//! OS processes bound to a session during one execution attempt.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::runtime::RuntimeKind;

/// Role of a process attached to a session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProcessKind {
    /// The wrapper instance itself.
    Wrapper,
    /// A runtime backend CLI executing the session.
    Backend,
    /// An in-process SDK execution.
    Sdk,
}

impl ProcessKind {
    /// Storage name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Wrapper => "wrapper",
            Self::Backend => "backend",
            Self::Sdk => "sdk",
        }
    }
}

/// Process record. At most one row per session has `is_current` set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RuntimeProcess {
    /// Unique record identifier.
    pub id: String,
    /// Session the process executes.
    pub session_id: String,
    /// OS process id.
    pub pid: u32,
    /// Process role.
    pub kind: ProcessKind,
    /// Backend running in the process, for backend processes.
    pub runtime: Option<RuntimeKind>,
    /// Launch time.
    pub started_at: DateTime<Utc>,
    /// Exit time.
    pub exited_at: Option<DateTime<Utc>>,
    /// Exit code; `None` while running or when killed by a signal.
    pub exit_code: Option<i32>,
    /// Whether this is the session's current process.
    pub is_current: bool,
}

impl RuntimeProcess {
    /// Construct a current process record for a session.
    #[must_use]
    pub fn new(
        session_id: String,
        pid: u32,
        kind: ProcessKind,
        runtime: Option<RuntimeKind>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id,
            pid,
            kind,
            runtime,
            started_at: Utc::now(),
            exited_at: None,
            exit_code: None,
            is_current: true,
        }
    }
}

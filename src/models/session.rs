//! Session model and lifecycle helpers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::agent::AgentType;

/// Open key/value metadata attached to a session.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// Lifecycle status for a persisted session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Session created but not yet running.
    Created,
    /// Session executing.
    Running,
    /// Session finished successfully.
    Done,
    /// Alias of `Done` written by some close paths.
    Completed,
    /// Session finished with an error.
    Failed,
    /// Session stopped by an interrupt or shutdown.
    Interrupted,
}

impl SessionStatus {
    /// Whether no further transition is permitted.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Done | Self::Completed | Self::Failed | Self::Interrupted
        )
    }

    /// Determine whether a lifecycle transition is permitted.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Created, Self::Running | Self::Failed | Self::Interrupted)
                | (
                    Self::Running,
                    Self::Done | Self::Completed | Self::Failed | Self::Interrupted
                )
        )
    }

    /// Storage and wire name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Done => "done",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Interrupted => "interrupted",
        }
    }
}

/// Session domain entity persisted in `SQLite`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub struct Session {
    /// Unique record identifier.
    pub id: String,
    /// Correlation id assigned by the backend, once known.
    pub claude_session_id: Option<String>,
    /// Kind of agent running the session.
    pub agent_type: AgentType,
    /// Session that spawned this one.
    pub parent_session_id: Option<String>,
    /// Wrapper instance supervising the session.
    pub instance_id: Option<String>,
    /// Current lifecycle status.
    pub status: SessionStatus,
    /// Initial prompt.
    pub prompt: String,
    /// Final result or error text.
    pub result: Option<String>,
    /// Open metadata map.
    pub metadata: Metadata,
    /// Archived sessions are hidden from listings but never deleted.
    pub archived: bool,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
    /// Time a terminal status was reached.
    pub completed_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Construct a new session with defaults and generated identifier.
    #[must_use]
    pub fn new(agent_type: AgentType, prompt: String, parent_session_id: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            claude_session_id: None,
            agent_type,
            parent_session_id,
            instance_id: None,
            status: SessionStatus::Created,
            prompt,
            result: None,
            metadata: Metadata::new(),
            archived: false,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    /// Determine whether a lifecycle transition is permitted.
    #[must_use]
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        self.status.can_transition_to(next)
    }
}

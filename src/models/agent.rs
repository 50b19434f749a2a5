//! Agent types and in-memory supervision status.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::session::SessionStatus;
use crate::AppError;

/// Kinds of agent a session may run. Requests naming anything else are
/// rejected.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum AgentType {
    /// Unrestricted worker.
    GeneralPurpose,
    /// Read-only codebase exploration.
    Explore,
    /// Implementation planning.
    Plan,
    /// Code changes.
    Build,
    /// Code review.
    Review,
    /// Test authoring and execution.
    Test,
}

impl AgentType {
    /// Every accepted agent type.
    pub const ALL: [Self; 6] = [
        Self::GeneralPurpose,
        Self::Explore,
        Self::Plan,
        Self::Build,
        Self::Review,
        Self::Test,
    ];

    /// Wire name of the agent type.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GeneralPurpose => "general-purpose",
            Self::Explore => "explore",
            Self::Plan => "plan",
            Self::Build => "build",
            Self::Review => "review",
            Self::Test => "test",
        }
    }
}

impl Display for AgentType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgentType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| {
                let allowed: Vec<&str> = Self::ALL.iter().map(|t| t.as_str()).collect();
                AppError::Validation(format!(
                    "unknown agent type '{s}'; expected one of: {}",
                    allowed.join(", ")
                ))
            })
    }
}

/// Status of an in-memory agent handle.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    /// Handle created; execution not started.
    Idle,
    /// Execution in progress.
    Running,
    /// Finished successfully.
    Done,
    /// Finished with an error.
    Failed,
    /// Stopped by an interrupt.
    Interrupted,
}

impl AgentStatus {
    /// Whether no further transition is permitted.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Failed | Self::Interrupted)
    }

    /// Agent status mirroring a persisted session status.
    #[must_use]
    pub fn from_session(status: SessionStatus) -> Self {
        match status {
            SessionStatus::Created => Self::Idle,
            SessionStatus::Running => Self::Running,
            SessionStatus::Done | SessionStatus::Completed => Self::Done,
            SessionStatus::Failed => Self::Failed,
            SessionStatus::Interrupted => Self::Interrupted,
        }
    }
}

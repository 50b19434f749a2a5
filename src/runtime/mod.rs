//! Runtime backends and the policy that routes sessions among them.
//!
//! Every backend is an external CLI process; the closed [`RuntimeKind`]
//! enumeration names them and [`selector::select`] picks one per session.

pub mod selector;

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::AppError;

pub use selector::{select, ModelFamily, RuntimeDecision};

/// Interchangeable execution backend.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    /// Claude Code CLI; the default family.
    Claude,
    /// Codex CLI; designated backend for OpenAI-family models.
    Codex,
    /// `OpenCode` CLI; alternate backend for OpenAI-family models.
    OpenCode,
    /// Gemini CLI.
    Gemini,
}

impl RuntimeKind {
    /// Wire name of the backend.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Claude => "claude",
            Self::Codex => "codex",
            Self::OpenCode => "opencode",
            Self::Gemini => "gemini",
        }
    }

    /// Backend that takes over when this one fails, if any.
    #[must_use]
    pub fn complement(self) -> Option<Self> {
        match self {
            Self::Codex => Some(Self::OpenCode),
            Self::OpenCode => Some(Self::Codex),
            Self::Claude | Self::Gemini => None,
        }
    }
}

impl Display for RuntimeKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuntimeKind {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "claude" => Ok(Self::Claude),
            "codex" => Ok(Self::Codex),
            "opencode" => Ok(Self::OpenCode),
            "gemini" => Ok(Self::Gemini),
            other => Err(AppError::Validation(format!("unknown runtime: {other}"))),
        }
    }
}

/// Configured backend preference for OpenAI-family models.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RuntimePreference {
    /// Codex first with `OpenCode` as fallback.
    #[default]
    Auto,
    /// Always Codex.
    Codex,
    /// Always `OpenCode`.
    OpenCode,
}

/// Named agent definition from configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AgentDefinition {
    /// Definition name, matched against the requested agent type.
    pub name: String,
    /// Model the agent runs on.
    #[serde(default)]
    pub model: Option<String>,
    /// Explicit backend hint.
    #[serde(default)]
    pub runtime: Option<RuntimeKind>,
}

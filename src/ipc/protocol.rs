//! Wire types of the instance socket protocol.
//!
//! Requests and responses are single JSON objects, one per line:
//!
//! ```json
//! {"action": "ping"}
//! {"action": "start-agent", "payload": {"agent_type": "explore", "prompt": "map the crate"}}
//! {"action": "interrupt", "payload": {"session_id": "4f0c..."}}
//! ```
//!
//! ```json
//! {"ok": true, "result": {"pong": true}}
//! {"ok": false, "error": {"code": "E_NOT_FOUND", "message": "agent 4f0c... not found"}}
//! ```

use serde::{Deserialize, Serialize};

use crate::models::session::Metadata;
use crate::orchestrator::WaitMode;
use crate::runtime::RuntimeKind;
use crate::AppError;

/// Every action the server understands.
pub const ACTIONS: [&str; 7] = [
    "ping",
    "status",
    "start-agent",
    "checkout",
    "message",
    "interrupt",
    "wait",
];

/// Request sent by a CLI process to an instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "action", content = "payload", rename_all = "kebab-case")]
pub enum IpcRequest {
    /// Liveness probe.
    Ping,
    /// Instance and agent overview.
    Status,
    /// Spawn agents and start their execution.
    StartAgent {
        /// Agent type.
        agent_type: String,
        /// Prompt for every spawned session.
        prompt: String,
        /// Number of sessions to spawn.
        #[serde(default = "default_count")]
        count: u32,
        /// Requesting session.
        #[serde(default)]
        parent_session_id: Option<String>,
        /// Model override.
        #[serde(default)]
        model: Option<String>,
        /// Backend hint overriding the agent definition.
        #[serde(default)]
        runtime: Option<RuntimeKind>,
        /// Metadata copied onto every session.
        #[serde(default)]
        metadata: Metadata,
    },
    /// Session detail with its progress summary.
    Checkout {
        /// Session id.
        session_id: String,
    },
    /// Deliver a message to a running agent.
    Message {
        /// Session id.
        session_id: String,
        /// Message text.
        text: String,
    },
    /// Interrupt a running agent.
    Interrupt {
        /// Session id.
        session_id: String,
        /// Signal name recorded in the session log.
        #[serde(default)]
        signal: Option<String>,
    },
    /// Block until sessions finish.
    Wait {
        /// Sessions to wait on.
        session_ids: Vec<String>,
        /// Completion condition.
        #[serde(default)]
        mode: WaitMode,
        /// Overall bound; the instance default applies when absent.
        #[serde(default)]
        timeout_ms: Option<u64>,
    },
}

fn default_count() -> u32 {
    1
}

impl IpcRequest {
    /// Action name of the request.
    #[must_use]
    pub fn action(&self) -> &'static str {
        match self {
            Self::Ping => "ping",
            Self::Status => "status",
            Self::StartAgent { .. } => "start-agent",
            Self::Checkout { .. } => "checkout",
            Self::Message { .. } => "message",
            Self::Interrupt { .. } => "interrupt",
            Self::Wait { .. } => "wait",
        }
    }

    /// Parse one request line.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidAction` when the action is missing or
    /// unknown and `AppError::InvalidPayload` when the line is not JSON or
    /// the payload does not match the action.
    pub fn parse(line: &str) -> Result<Self, AppError> {
        let value: serde_json::Value = serde_json::from_str(line)
            .map_err(|e| AppError::InvalidPayload(format!("invalid json: {e}")))?;

        let action = value
            .get("action")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| AppError::InvalidAction("missing 'action' field".into()))?;
        if !ACTIONS.contains(&action) {
            return Err(AppError::InvalidAction(format!(
                "unknown action '{action}'; expected one of: {}",
                ACTIONS.join(", ")
            )));
        }
        let action = action.to_owned();

        serde_json::from_value(value)
            .map_err(|e| AppError::InvalidPayload(format!("bad payload for '{action}': {e}")))
    }
}

/// Error body of a failed response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    /// Stable error code, e.g. `E_NOT_FOUND`.
    pub code: String,
    /// Human-readable detail.
    pub message: String,
}

/// Response written by the instance, or synthesized by the client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IpcResponse {
    /// Whether the request succeeded.
    pub ok: bool,
    /// Payload on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Error on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl IpcResponse {
    /// Successful response carrying `result`.
    #[must_use]
    pub fn success(result: serde_json::Value) -> Self {
        Self {
            ok: true,
            result: Some(result),
            error: None,
        }
    }

    /// Failed response with an explicit code.
    #[must_use]
    pub fn failure(code: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            result: None,
            error: Some(ErrorBody {
                code: code.to_owned(),
                message: message.into(),
            }),
        }
    }

    /// Failed response describing `err`.
    #[must_use]
    pub fn from_error(err: &AppError) -> Self {
        Self::failure(err.code(), err.to_string())
    }

    /// Error code, if the response is a failure.
    #[must_use]
    pub fn error_code(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.code.as_str())
    }
}

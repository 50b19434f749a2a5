//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Stable wire codes carried in IPC error bodies.
pub mod codes {
    /// Configuration failure.
    pub const CONFIG: &str = "E_CONFIG";
    /// Persistence failure.
    pub const DB: &str = "E_DB";
    /// File-system failure.
    pub const IO: &str = "E_IO";
    /// Transport-level failure; the request may never have reached the server.
    pub const TRANSPORT: &str = "E_TRANSPORT";
    /// Registry lock could not be acquired in time.
    pub const LOCK_TIMEOUT: &str = "E_LOCK_TIMEOUT";
    /// Instance, session or agent missing.
    pub const NOT_FOUND: &str = "E_NOT_FOUND";
    /// Request content failed validation.
    pub const VALIDATION: &str = "E_VALIDATION";
    /// Unknown IPC action.
    pub const INVALID_ACTION: &str = "E_INVALID_ACTION";
    /// IPC payload did not match the action's schema.
    pub const INVALID_PAYLOAD: &str = "E_INVALID_PAYLOAD";
    /// Operation attempted against a terminal agent.
    pub const STATE: &str = "E_STATE";
    /// More than one candidate instance and none selected.
    pub const AMBIGUOUS: &str = "E_AMBIGUOUS";
    /// Timed out waiting for a reply or a terminal state.
    pub const TIMEOUT: &str = "E_TIMEOUT";
    /// Connection closed before any reply arrived.
    pub const NO_RESPONSE: &str = "E_NO_RESPONSE";
    /// Reply could not be parsed.
    pub const INVALID_RESPONSE: &str = "E_INVALID_RESPONSE";
}

/// Application error enumeration covering all domain failure modes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Persistence failure when interacting with `SQLite`.
    Db(String),
    /// File-system or I/O operation failure.
    Io(String),
    /// IPC transport failure (connect, write or read error).
    Ipc(String),
    /// Registry lock was not acquired before the timeout elapsed.
    LockTimeout(String),
    /// Requested entity does not exist.
    NotFound(String),
    /// Input rejected by validation (unknown agent type, bad count).
    Validation(String),
    /// IPC request named an unknown action.
    InvalidAction(String),
    /// IPC request payload was malformed.
    InvalidPayload(String),
    /// Transition attempted out of a terminal state.
    StateViolation(String),
    /// Several live instances matched and none was selected.
    Ambiguous(String),
    /// A bounded wait elapsed.
    Timeout(String),
}

impl AppError {
    /// Wire code reported to IPC clients for this error.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => codes::CONFIG,
            Self::Db(_) => codes::DB,
            Self::Io(_) => codes::IO,
            Self::Ipc(_) => codes::TRANSPORT,
            Self::LockTimeout(_) => codes::LOCK_TIMEOUT,
            Self::NotFound(_) => codes::NOT_FOUND,
            Self::Validation(_) => codes::VALIDATION,
            Self::InvalidAction(_) => codes::INVALID_ACTION,
            Self::InvalidPayload(_) => codes::INVALID_PAYLOAD,
            Self::StateViolation(_) => codes::STATE,
            Self::Ambiguous(_) => codes::AMBIGUOUS,
            Self::Timeout(_) => codes::TIMEOUT,
        }
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Db(msg) => write!(f, "db: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Ipc(msg) => write!(f, "ipc: {msg}"),
            Self::LockTimeout(msg) => write!(f, "lock timeout: {msg}"),
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::Validation(msg) => write!(f, "validation: {msg}"),
            Self::InvalidAction(msg) => write!(f, "invalid action: {msg}"),
            Self::InvalidPayload(msg) => write!(f, "invalid payload: {msg}"),
            Self::StateViolation(msg) => write!(f, "state violation: {msg}"),
            Self::Ambiguous(msg) => write!(f, "ambiguous: {msg}"),
            Self::Timeout(msg) => write!(f, "timeout: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        Self::Db(err.to_string())
    }
}

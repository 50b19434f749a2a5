//! Global configuration parsing and validation.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::runtime::{AgentDefinition, RuntimeKind, RuntimePreference};
use crate::{AppError, Result};

/// Name of the per-project state directory.
pub const STATE_DIR_NAME: &str = ".agent-conductor";

/// Registry locking behavior.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RegistryConfig {
    /// Maximum time to wait for the registry lock.
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
    /// Delay between lock acquisition attempts.
    #[serde(default = "default_lock_retry_ms")]
    pub lock_retry_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: default_lock_timeout_ms(),
            lock_retry_ms: default_lock_retry_ms(),
        }
    }
}

fn default_lock_timeout_ms() -> u64 {
    5_000
}

fn default_lock_retry_ms() -> u64 {
    25
}

/// IPC client settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct IpcConfig {
    /// Time allowed for one request/response exchange.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

fn default_request_timeout_ms() -> u64 {
    15_000
}

/// Agent lifecycle settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct LifecycleConfig {
    /// Interval between agent status polls while waiting.
    #[serde(default = "default_wait_poll_interval_ms")]
    pub wait_poll_interval_ms: u64,
    /// Default bound for a single wait.
    #[serde(default = "default_wait_timeout_ms")]
    pub wait_timeout_ms: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            wait_poll_interval_ms: default_wait_poll_interval_ms(),
            wait_timeout_ms: default_wait_timeout_ms(),
        }
    }
}

fn default_wait_poll_interval_ms() -> u64 {
    500
}

fn default_wait_timeout_ms() -> u64 {
    30 * 60 * 1_000
}

/// Command line used to launch one runtime backend.
///
/// The prompt is appended as the final argument; when a model is resolved
/// it is passed as `--model <name>` before the prompt.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RuntimeCommand {
    /// Executable name or path.
    pub program: String,
    /// Fixed arguments placed before the model and prompt.
    #[serde(default)]
    pub args: Vec<String>,
}

impl RuntimeCommand {
    fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_owned(),
            args: args.iter().map(|a| (*a).to_owned()).collect(),
        }
    }
}

/// Launch commands for every runtime backend.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RuntimeCommands {
    /// Claude Code CLI.
    #[serde(default = "default_claude_command")]
    pub claude: RuntimeCommand,
    /// Codex CLI.
    #[serde(default = "default_codex_command")]
    pub codex: RuntimeCommand,
    /// `OpenCode` CLI.
    #[serde(default = "default_opencode_command")]
    pub opencode: RuntimeCommand,
    /// Gemini CLI.
    #[serde(default = "default_gemini_command")]
    pub gemini: RuntimeCommand,
}

impl RuntimeCommands {
    /// Command for the given backend.
    #[must_use]
    pub fn get(&self, kind: RuntimeKind) -> &RuntimeCommand {
        match kind {
            RuntimeKind::Claude => &self.claude,
            RuntimeKind::Codex => &self.codex,
            RuntimeKind::OpenCode => &self.opencode,
            RuntimeKind::Gemini => &self.gemini,
        }
    }
}

impl Default for RuntimeCommands {
    fn default() -> Self {
        Self {
            claude: default_claude_command(),
            codex: default_codex_command(),
            opencode: default_opencode_command(),
            gemini: default_gemini_command(),
        }
    }
}

fn default_claude_command() -> RuntimeCommand {
    RuntimeCommand::new("claude", &["-p"])
}

fn default_codex_command() -> RuntimeCommand {
    RuntimeCommand::new("codex", &["exec"])
}

fn default_opencode_command() -> RuntimeCommand {
    RuntimeCommand::new("opencode", &["run"])
}

fn default_gemini_command() -> RuntimeCommand {
    RuntimeCommand::new("gemini", &["-p"])
}

/// Runtime backend routing settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct RuntimeConfig {
    /// Backend preference for OpenAI-family models.
    #[serde(default)]
    pub openai_preference: RuntimePreference,
    /// Whether a failing backend hands off to its complement.
    #[serde(default = "default_true")]
    pub fallback_on_error: bool,
    /// Launch commands per backend.
    #[serde(default)]
    pub commands: RuntimeCommands,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            openai_preference: RuntimePreference::default(),
            fallback_on_error: true,
            commands: RuntimeCommands::default(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_spawn_count() -> u32 {
    8
}

/// Global configuration parsed from `conductor.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Root directory of the project the instances work on.
    pub project_root: PathBuf,
    /// Directory holding the database, run directory and session logs.
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
    /// Directory where instance sockets are created.
    #[serde(default)]
    pub socket_dir: Option<PathBuf>,
    /// Upper bound on `count` for a single spawn request.
    #[serde(default = "default_max_spawn_count")]
    pub max_spawn_count: u32,
    /// Registry locking settings.
    #[serde(default)]
    pub registry: RegistryConfig,
    /// IPC client settings.
    #[serde(default)]
    pub ipc: IpcConfig,
    /// Lifecycle polling settings.
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    /// Runtime backend routing.
    #[serde(default)]
    pub runtime: RuntimeConfig,
    /// Named agent definitions.
    #[serde(default)]
    pub agents: Vec<AgentDefinition>,
}

impl GlobalConfig {
    /// Default configuration for a project root.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the project root does not exist.
    pub fn for_project(project_root: impl Into<PathBuf>) -> Result<Self> {
        let mut config = Self {
            project_root: project_root.into(),
            state_dir: None,
            socket_dir: None,
            max_spawn_count: default_max_spawn_count(),
            registry: RegistryConfig::default(),
            ipc: IpcConfig::default(),
            lifecycle: LifecycleConfig::default(),
            runtime: RuntimeConfig::default(),
            agents: Vec::new(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and normalize paths.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Directory holding all per-project state.
    #[must_use]
    pub fn state_dir(&self) -> PathBuf {
        self.state_dir
            .clone()
            .unwrap_or_else(|| self.project_root.join(STATE_DIR_NAME))
    }

    /// Run directory holding the registry document and its lock marker.
    #[must_use]
    pub fn run_dir(&self) -> PathBuf {
        self.state_dir().join("run")
    }

    /// Directory holding per-session execution logs.
    #[must_use]
    pub fn log_dir(&self) -> PathBuf {
        self.state_dir().join("logs")
    }

    /// `SQLite` database path.
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.state_dir().join("conductor.db")
    }

    /// Directory where instance sockets are created.
    #[must_use]
    pub fn socket_dir(&self) -> PathBuf {
        self.socket_dir.clone().unwrap_or_else(std::env::temp_dir)
    }

    /// Registry lock timeout.
    #[must_use]
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.registry.lock_timeout_ms)
    }

    /// Delay between registry lock attempts.
    #[must_use]
    pub fn lock_retry(&self) -> Duration {
        Duration::from_millis(self.registry.lock_retry_ms)
    }

    /// IPC request timeout.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.ipc.request_timeout_ms)
    }

    /// Interval between wait polls.
    #[must_use]
    pub fn wait_poll_interval(&self) -> Duration {
        Duration::from_millis(self.lifecycle.wait_poll_interval_ms)
    }

    /// Default bound for one wait.
    #[must_use]
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.lifecycle.wait_timeout_ms)
    }

    /// Look up a named agent definition.
    #[must_use]
    pub fn agent_definition(&self, name: &str) -> Option<&AgentDefinition> {
        self.agents.iter().find(|def| def.name == name)
    }

    fn validate(&mut self) -> Result<()> {
        if self.max_spawn_count == 0 {
            return Err(AppError::Config(
                "max_spawn_count must be greater than zero".into(),
            ));
        }
        if self.registry.lock_timeout_ms == 0 || self.registry.lock_retry_ms == 0 {
            return Err(AppError::Config(
                "registry lock timeout and retry delay must be greater than zero".into(),
            ));
        }
        if self.ipc.request_timeout_ms == 0 {
            return Err(AppError::Config(
                "ipc.request_timeout_ms must be greater than zero".into(),
            ));
        }
        if self.lifecycle.wait_poll_interval_ms == 0 || self.lifecycle.wait_timeout_ms == 0 {
            return Err(AppError::Config(
                "lifecycle wait interval and timeout must be greater than zero".into(),
            ));
        }

        let mut seen = HashSet::new();
        for def in &self.agents {
            if !seen.insert(def.name.as_str()) {
                return Err(AppError::Config(format!(
                    "duplicate agent definition '{}'",
                    def.name
                )));
            }
        }

        let canonical_root = self
            .project_root
            .canonicalize()
            .map_err(|err| AppError::Config(format!("project_root invalid: {err}")))?;
        self.project_root = canonical_root;

        Ok(())
    }
}

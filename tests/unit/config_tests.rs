//! Unit tests for configuration parsing and validation.

use std::time::Duration;

use agent_conductor::config::{GlobalConfig, STATE_DIR_NAME};
use agent_conductor::runtime::{RuntimeKind, RuntimePreference};
use agent_conductor::AppError;

fn config_with(root: &std::path::Path, extra: &str) -> Result<GlobalConfig, AppError> {
    let toml = format!("project_root = '{}'\n{extra}", root.display());
    GlobalConfig::from_toml_str(&toml)
}

#[test]
fn minimal_config_uses_defaults() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = config_with(dir.path(), "").expect("parse");

    assert_eq!(config.max_spawn_count, 8);
    assert_eq!(config.lock_timeout(), Duration::from_secs(5));
    assert_eq!(config.lock_retry(), Duration::from_millis(25));
    assert_eq!(config.request_timeout(), Duration::from_secs(15));
    assert_eq!(config.wait_poll_interval(), Duration::from_millis(500));
    assert_eq!(config.runtime.openai_preference, RuntimePreference::Auto);
    assert!(config.runtime.fallback_on_error);
    assert!(config.agents.is_empty());
}

#[test]
fn state_paths_derive_from_project_root() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = config_with(dir.path(), "").expect("parse");
    let root = dir.path().canonicalize().expect("canonical");

    assert_eq!(config.project_root, root);
    assert_eq!(config.state_dir(), root.join(STATE_DIR_NAME));
    assert_eq!(config.run_dir(), root.join(STATE_DIR_NAME).join("run"));
    assert_eq!(config.log_dir(), root.join(STATE_DIR_NAME).join("logs"));
    assert_eq!(
        config.db_path(),
        root.join(STATE_DIR_NAME).join("conductor.db")
    );
}

#[test]
fn explicit_state_and_socket_dirs_win() {
    let dir = tempfile::tempdir().expect("tempdir");
    let extra = "state_dir = '/var/tmp/conductor-state'\nsocket_dir = '/tmp/acd'\n";
    let config = config_with(dir.path(), extra).expect("parse");

    assert_eq!(
        config.state_dir(),
        std::path::PathBuf::from("/var/tmp/conductor-state")
    );
    assert_eq!(config.socket_dir(), std::path::PathBuf::from("/tmp/acd"));
}

#[test]
fn full_config_parses_every_section() {
    let dir = tempfile::tempdir().expect("tempdir");
    let extra = r#"
max_spawn_count = 3

[registry]
lock_timeout_ms = 800
lock_retry_ms = 10

[ipc]
request_timeout_ms = 2000

[lifecycle]
wait_poll_interval_ms = 50
wait_timeout_ms = 60000

[runtime]
openai_preference = "opencode"
fallback_on_error = false

[runtime.commands.claude]
program = "/opt/claude/bin/claude"
args = ["-p", "--output-format", "stream-json"]

[[agents]]
name = "review"
model = "gpt-5"
runtime = "codex"

[[agents]]
name = "explore"
model = "claude-haiku-4"
"#;
    let config = config_with(dir.path(), extra).expect("parse");

    assert_eq!(config.max_spawn_count, 3);
    assert_eq!(config.lock_timeout(), Duration::from_millis(800));
    assert_eq!(config.request_timeout(), Duration::from_secs(2));
    assert_eq!(config.wait_timeout(), Duration::from_secs(60));
    assert_eq!(config.runtime.openai_preference, RuntimePreference::OpenCode);
    assert!(!config.runtime.fallback_on_error);

    let claude = config.runtime.commands.get(RuntimeKind::Claude);
    assert_eq!(claude.program, "/opt/claude/bin/claude");
    assert_eq!(claude.args.len(), 3);
    assert_eq!(config.runtime.commands.get(RuntimeKind::Codex).program, "codex");

    let review = config.agent_definition("review").expect("review agent");
    assert_eq!(review.model.as_deref(), Some("gpt-5"));
    assert_eq!(review.runtime, Some(RuntimeKind::Codex));
    assert!(config.agent_definition("missing").is_none());
}

#[test]
fn zero_spawn_count_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = config_with(dir.path(), "max_spawn_count = 0").unwrap_err();
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn zero_lock_timeout_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = config_with(dir.path(), "[registry]\nlock_timeout_ms = 0").unwrap_err();
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn zero_poll_interval_is_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = config_with(dir.path(), "[lifecycle]\nwait_poll_interval_ms = 0").unwrap_err();
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn duplicate_agent_names_are_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let extra = "[[agents]]\nname = \"plan\"\n\n[[agents]]\nname = \"plan\"\n";
    let err = config_with(dir.path(), extra).unwrap_err();
    assert!(matches!(err, AppError::Config(ref msg) if msg.contains("plan")));
}

#[test]
fn missing_project_root_is_rejected() {
    let err = GlobalConfig::for_project("/definitely/not/a/real/project/root").unwrap_err();
    assert!(matches!(err, AppError::Config(_)));
}

#[test]
fn unknown_runtime_hint_fails_to_parse() {
    let dir = tempfile::tempdir().expect("tempdir");
    let extra = "[[agents]]\nname = \"x\"\nruntime = \"cobol\"\n";
    assert!(config_with(dir.path(), extra).is_err());
}

#[test]
fn load_from_path_reads_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("conductor.toml");
    std::fs::write(
        &path,
        format!("project_root = '{}'\nmax_spawn_count = 2\n", dir.path().display()),
    )
    .expect("write config");

    let config = GlobalConfig::load_from_path(&path).expect("load");
    assert_eq!(config.max_spawn_count, 2);
}

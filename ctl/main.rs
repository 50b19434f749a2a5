#![forbid(unsafe_code)]

//! `agent-conductor-ctl`: short-lived CLI companion for `agent-conductor`.
//!
//! Resolves a running instance through the project's instance registry and
//! sends it one JSON request over its socket. Exit status is 0 on success,
//! 1 on any error and 2 when a `wait` ends on its timeout.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use agent_conductor::config::GlobalConfig;
use agent_conductor::ipc::{send_request, IpcRequest, IpcResponse};
use agent_conductor::models::session::Metadata;
use agent_conductor::orchestrator::WaitMode;
use agent_conductor::persistence::db;
use agent_conductor::persistence::session_repo::SessionRepo;
use agent_conductor::registry::{resolve_target, InstanceRegistry};
use agent_conductor::runtime::RuntimeKind;
use agent_conductor::Result;

const EXIT_ERROR: u8 = 1;
const EXIT_WAIT_TIMEOUT: u8 = 2;

#[derive(Debug, Parser)]
#[command(
    name = "agent-conductor-ctl",
    about = "Local CLI for agent-conductor instances",
    version,
    long_about = None
)]
struct Cli {
    /// Project root whose instances are addressed.
    #[arg(long, default_value = ".")]
    project: PathBuf,

    /// Path to the TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Instance id or unique id prefix. Required when several instances run.
    #[arg(long)]
    instance: Option<String>,

    /// Request timeout in milliseconds (defaults to the configured value).
    #[arg(long)]
    timeout_ms: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List registered instances after stale-process reconciliation.
    Instances,

    /// Remove ended instances from the registry and archive finished
    /// sessions.
    Prune {
        /// Number of most recent sessions considered for archiving.
        #[arg(long, default_value_t = 500)]
        limit: u32,
    },

    /// Check that an instance answers.
    Ping,

    /// Show instance and agent status.
    Status,

    /// Spawn agents on an instance.
    Spawn {
        /// Agent type (general-purpose, explore, plan, build, review, test).
        agent_type: String,
        /// Prompt given to every spawned agent.
        prompt: String,
        /// Number of independent agents.
        #[arg(long, default_value_t = 1)]
        count: u32,
        /// Session that requested the spawn.
        #[arg(long)]
        parent: Option<String>,
        /// Model override.
        #[arg(long)]
        model: Option<String>,
        /// Backend hint: claude, codex, opencode or gemini.
        #[arg(long)]
        runtime: Option<RuntimeKind>,
    },

    /// Show a session with its progress summary.
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
        #[arg(long)]
        signal: Option<String>,
    },

    /// Wait for sessions to finish.
    Wait {
        /// Session ids.
        #[arg(required = true)]
        session_ids: Vec<String>,
        /// Return when any one session finishes instead of all.
        #[arg(long)]
        any: bool,
        /// Overall wait bound in milliseconds.
        #[arg(long)]
        wait_ms: Option<u64>,
    },
}

fn main() -> ExitCode {
    let args = Cli::parse();
    init_tracing();

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("Error: failed to build tokio runtime: {err}");
            return ExitCode::from(EXIT_ERROR);
        }
    };

    match runtime.block_on(run(args)) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error [{}]: {err}", err.code());
            ExitCode::from(EXIT_ERROR)
        }
    }
}

async fn run(args: Cli) -> Result<ExitCode> {
    let config = match args.config {
        Some(ref path) => GlobalConfig::load_from_path(path)?,
        None => GlobalConfig::for_project(&args.project)?,
    };
    let registry = InstanceRegistry::from_config(&config);

    let request = match args.command {
        Command::Instances => {
            print_json(&serde_json::to_value(registry.list()?).unwrap_or_default());
            return Ok(ExitCode::SUCCESS);
        }
        Command::Prune { limit } => {
            let removed = registry.prune_ended()?;
            let sessions = SessionRepo::new(Arc::new(db::connect(&config.db_path()).await?));
            let archived = sessions.archive_finished(limit).await?;
            print_json(&serde_json::json!({ "removed": removed, "archived": archived }));
            return Ok(ExitCode::SUCCESS);
        }
        Command::Ping => IpcRequest::Ping,
        Command::Status => IpcRequest::Status,
        Command::Spawn {
            agent_type,
            prompt,
            count,
            parent,
            model,
            runtime,
        } => IpcRequest::StartAgent {
            agent_type,
            prompt,
            count,
            parent_session_id: parent,
            model,
            runtime,
            metadata: Metadata::new(),
        },
        Command::Checkout { session_id } => IpcRequest::Checkout { session_id },
        Command::Message { session_id, text } => IpcRequest::Message { session_id, text },
        Command::Interrupt { session_id, signal } => IpcRequest::Interrupt { session_id, signal },
        Command::Wait {
            session_ids,
            any,
            wait_ms,
        } => IpcRequest::Wait {
            session_ids,
            mode: if any { WaitMode::Any } else { WaitMode::All },
            timeout_ms: Some(wait_ms.unwrap_or_else(|| duration_ms(config.wait_timeout()))),
        },
    };

    let entries = registry.list()?;
    let target = resolve_target(&entries, args.instance.as_deref())?;

    let mut timeout = args
        .timeout_ms
        .map_or_else(|| config.request_timeout(), Duration::from_millis);
    if let IpcRequest::Wait {
        timeout_ms: Some(wait_ms),
        ..
    } = &request
    {
        timeout += Duration::from_millis(*wait_ms);
    }

    let response = send_request(&target.socket_path, &request, timeout).await?;
    Ok(report(&request, &response))
}

fn report(request: &IpcRequest, response: &IpcResponse) -> ExitCode {
    if !response.ok {
        let (code, message) = response
            .error
            .as_ref()
            .map_or(("E_UNKNOWN", "unknown error"), |e| {
                (e.code.as_str(), e.message.as_str())
            });
        eprintln!("Error [{code}]: {message}");
        return ExitCode::from(EXIT_ERROR);
    }

    let result = response.result.clone().unwrap_or(serde_json::Value::Null);
    print_json(&result);

    let timed_out = matches!(request, IpcRequest::Wait { .. })
        && result
            .get("timed_out")
            .and_then(serde_json::Value::as_bool)
            .unwrap_or(false);
    if timed_out {
        eprintln!("wait timed out; partial progress shown above");
        return ExitCode::from(EXIT_WAIT_TIMEOUT);
    }
    ExitCode::SUCCESS
}

fn print_json(value: &serde_json::Value) {
    println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    if let Err(err) = fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .try_init()
    {
        eprintln!("failed to init tracing: {err}");
    }
}

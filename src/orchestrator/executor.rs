//! Backend execution loop.
//!
//! Launches the runtime CLI chosen by the selector for a session, streams
//! its stdout into the session log, forwards delivered messages to its
//! stdin, and settles the agent when the process exits. A failed launch or
//! a non-zero exit hands off once to the decision's fallback backend.

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{ChildStdin, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::RuntimeCommands;
use crate::models::runtime_process::{ProcessKind, RuntimeProcess};
use crate::models::session::Metadata;
use crate::persistence::runtime_process_repo::RuntimeProcessRepo;
use crate::persistence::session_repo::SessionRepo;
use crate::runtime::{RuntimeDecision, RuntimeKind};
use crate::session_log::{LogEvent, SessionLogStore};
use crate::AppError;

use super::agent_manager::AgentManager;

/// Environment variable carrying the session id into the backend.
pub const SESSION_ENV: &str = "AGENT_CONDUCTOR_SESSION_ID";

/// Longest stderr tail kept for failure messages.
const STDERR_TAIL_LEN: usize = 2048;

enum Attempt {
    Completed(String),
    Failed(String),
    Cancelled,
}

enum Exit {
    Status(std::io::Result<ExitStatus>),
    Cancelled,
}

/// Runs sessions on their runtime backends.
#[derive(Clone)]
pub struct Executor {
    manager: AgentManager,
    sessions: SessionRepo,
    processes: RuntimeProcessRepo,
    log: Arc<SessionLogStore>,
    commands: RuntimeCommands,
    project_root: PathBuf,
}

impl Executor {
    /// Create an executor launching backends from `project_root`.
    #[must_use]
    pub fn new(
        manager: AgentManager,
        processes: RuntimeProcessRepo,
        log: Arc<SessionLogStore>,
        commands: RuntimeCommands,
        project_root: PathBuf,
    ) -> Self {
        Self {
            sessions: manager.sessions().clone(),
            manager,
            processes,
            log,
            commands,
            project_root,
        }
    }

    /// Start the execution loop of a spawned session in the background.
    #[must_use]
    pub fn launch(
        &self,
        session_id: String,
        prompt: String,
        decision: RuntimeDecision,
    ) -> JoinHandle<()> {
        let executor = self.clone();
        let span = info_span!("execute", %session_id, runtime = %decision.runtime);
        tokio::spawn(
            async move {
                executor.run(&session_id, &prompt, decision).await;
            }
            .instrument(span),
        )
    }

    async fn run(&self, session_id: &str, prompt: &str, decision: RuntimeDecision) {
        let cancel = match self.manager.cancellation_token(session_id).await {
            Ok(token) => token,
            Err(err) => {
                warn!(%err, "session has no agent handle; not executing");
                return;
            }
        };
        let mut inbox = match self.manager.take_inbox(session_id).await {
            Ok(rx) => rx,
            Err(err) => {
                warn!(%err, "cannot attach execution loop");
                return;
            }
        };

        let mut runtime = decision.runtime;
        let mut fallback = decision.fallback_runtime;
        loop {
            let attempt = self
                .attempt(
                    session_id,
                    prompt,
                    runtime,
                    decision.model.as_deref(),
                    &cancel,
                    &mut inbox,
                )
                .await;

            match attempt {
                Attempt::Completed(text) => {
                    settle(self.manager.complete_agent(session_id, &text).await);
                    return;
                }
                Attempt::Cancelled => {
                    info!("execution cancelled");
                    return;
                }
                Attempt::Failed(error) => {
                    if let Some(next) = fallback.take() {
                        warn!(%error, from = %runtime, to = %next, "backend failed; handing off");
                        self.log.append_or_warn(
                            session_id,
                            LogEvent::System {
                                message: format!("{runtime} failed ({error}); retrying on {next}"),
                            },
                        );
                        let mut handoff = Metadata::new();
                        handoff.insert(
                            "handoff".into(),
                            serde_json::json!({ "from": runtime, "to": next, "error": error }),
                        );
                        if let Err(err) = self.sessions.merge_metadata(session_id, handoff).await {
                            warn!(%err, "failed to record hand-off");
                        }
                        runtime = next;
                        continue;
                    }
                    settle(self.manager.fail_agent(session_id, &error).await);
                    return;
                }
            }
        }
    }

    async fn attempt(
        &self,
        session_id: &str,
        prompt: &str,
        runtime: RuntimeKind,
        model: Option<&str>,
        cancel: &CancellationToken,
        inbox: &mut mpsc::UnboundedReceiver<String>,
    ) -> Attempt {
        let command = self.commands.get(runtime);
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args);
        if let Some(model) = model {
            cmd.arg("--model").arg(model);
        }
        cmd.arg(prompt)
            .env(SESSION_ENV, session_id)
            .current_dir(&self.project_root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) => {
                return Attempt::Failed(format!(
                    "failed to launch {runtime} ({}): {err}",
                    command.program
                ))
            }
        };

        let pid = child.id().unwrap_or_default();
        info!(pid, %runtime, "backend launched");
        let record = RuntimeProcess::new(
            session_id.to_owned(),
            pid,
            ProcessKind::Backend,
            Some(runtime),
        );
        let process_id = match self.processes.create_current(&record).await {
            Ok(process) => Some(process.id),
            Err(err) => {
                warn!(%err, "failed to record backend process");
                None
            }
        };

        let mut stdin = child.stdin.take();
        let mut lines = child.stdout.take().map(|s| BufReader::new(s).lines());
        let stderr_tail = child.stderr.take().map(|stderr| {
            tokio::spawn(async move {
                let mut tail = String::new();
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tail.push_str(&line);
                    tail.push('\n');
                    if tail.len() > STDERR_TAIL_LEN {
                        let cut = tail.len() - STDERR_TAIL_LEN;
                        let cut = (cut..tail.len())
                            .find(|i| tail.is_char_boundary(*i))
                            .unwrap_or(tail.len());
                        tail.replace_range(..cut, "");
                    }
                }
                tail
            })
        });

        let mut output = StreamState::default();
        let mut stdout_open = lines.is_some();
        let mut inbox_open = true;

        let exit = loop {
            tokio::select! {
                () = cancel.cancelled() => break Exit::Cancelled,
                line = next_line(&mut lines), if stdout_open => match line {
                    Some(line) => self.record_line(session_id, &line, &mut output).await,
                    None => stdout_open = false,
                },
                message = inbox.recv(), if inbox_open => match message {
                    Some(text) => forward_message(&mut stdin, &text).await,
                    None => inbox_open = false,
                },
                status = child.wait() => break Exit::Status(status),
            }
        };

        let status = match exit {
            Exit::Cancelled => {
                if let Err(err) = child.start_kill() {
                    debug!(%err, "backend already gone");
                }
                let _ = child.wait().await;
                self.mark_exited(process_id.as_deref(), None).await;
                return Attempt::Cancelled;
            }
            Exit::Status(status) => status,
        };

        while let Some(line) = next_line(&mut lines).await {
            self.record_line(session_id, &line, &mut output).await;
        }

        let stderr = match stderr_tail {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };

        match status {
            Ok(status) => {
                self.mark_exited(process_id.as_deref(), status.code()).await;
                if status.success() {
                    info!("backend finished");
                    Attempt::Completed(output.into_result())
                } else {
                    let code = status
                        .code()
                        .map_or_else(|| "signal".to_owned(), |c| c.to_string());
                    let detail = stderr.trim();
                    Attempt::Failed(if detail.is_empty() {
                        format!("{runtime} exited with {code}")
                    } else {
                        format!("{runtime} exited with {code}: {detail}")
                    })
                }
            }
            Err(err) => {
                self.mark_exited(process_id.as_deref(), None).await;
                Attempt::Failed(format!("failed to wait for {runtime}: {err}"))
            }
        }
    }

    /// Record one stdout line. Lines that parse as a [`LogEvent`] are
    /// stored as-is; anything else is stored as output.
    async fn record_line(&self, session_id: &str, line: &str, state: &mut StreamState) {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return;
        }

        if let Ok(event) = serde_json::from_str::<LogEvent>(trimmed) {
            match event {
                LogEvent::Result { text } => state.result = Some(text),
                other => self.log.append_or_warn(session_id, other),
            }
            return;
        }

        if let Ok(serde_json::Value::Object(map)) = serde_json::from_str(trimmed) {
            if state.correlation_id.is_none() {
                if let Some(id) = map.get("session_id").and_then(serde_json::Value::as_str) {
                    match self.sessions.set_claude_session_id(session_id, id).await {
                        Ok(()) => state.correlation_id = Some(id.to_owned()),
                        Err(err) => warn!(%err, "failed to store backend session id"),
                    }
                }
            }
            if let Some(text) = map.get("result").and_then(serde_json::Value::as_str) {
                state.result = Some(text.to_owned());
                return;
            }
        }

        state.last_output = Some(trimmed.to_owned());
        self.log.append_or_warn(
            session_id,
            LogEvent::Output {
                text: trimmed.to_owned(),
            },
        );
    }

    async fn mark_exited(&self, process_id: Option<&str>, exit_code: Option<i32>) {
        if let Some(id) = process_id {
            if let Err(err) = self.processes.mark_exited(id, exit_code).await {
                warn!(%err, "failed to record backend exit");
            }
        }
    }
}

#[derive(Default)]
struct StreamState {
    correlation_id: Option<String>,
    result: Option<String>,
    last_output: Option<String>,
}

impl StreamState {
    fn into_result(self) -> String {
        self.result.or(self.last_output).unwrap_or_default()
    }
}

async fn next_line<R>(lines: &mut Option<tokio::io::Lines<R>>) -> Option<String>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    match lines.as_mut()?.next_line().await {
        Ok(line) => line,
        Err(err) => {
            warn!(%err, "failed to read backend output");
            None
        }
    }
}

async fn forward_message(stdin: &mut Option<ChildStdin>, text: &str) {
    let Some(pipe) = stdin.as_mut() else {
        warn!("backend stdin closed; message dropped");
        return;
    };
    let mut line = text.to_owned();
    line.push('\n');
    if let Err(err) = pipe.write_all(line.as_bytes()).await {
        warn!(%err, "failed to forward message to backend");
        *stdin = None;
    }
}

/// Log the outcome of settling an agent. Losing a race with an interrupt
/// is expected.
fn settle(result: crate::Result<()>) {
    match result {
        Ok(()) => {}
        Err(AppError::StateViolation(msg) | AppError::NotFound(msg)) => {
            debug!(%msg, "agent already settled");
        }
        Err(err) => warn!(%err, "failed to settle agent"),
    }
}

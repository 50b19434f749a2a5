//! Instance-side socket server.
//!
//! Listens on the instance's Unix domain socket (named pipe on Windows)
//! using the `interprocess` crate, reads one JSON request per line and
//! writes one JSON response per line. See [`super::protocol`] for the
//! wire types.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use interprocess::local_socket::{tokio::prelude::*, GenericFilePath, ListenerOptions};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::instance::AppState;
use crate::models::session::Metadata;
use crate::orchestrator::{wait_for_sessions, SpawnRequest, WaitMode};
use crate::runtime::{self, AgentDefinition, RuntimeKind};
use crate::session_log::summarize;
use crate::{AppError, Result};

use super::protocol::{IpcRequest, IpcResponse};

/// Spawn the IPC server task on `state.socket_path`.
///
/// A socket file left behind by a dead instance is removed first.
///
/// # Errors
///
/// Returns `AppError::Ipc` if the listener cannot be created.
pub fn spawn_ipc_server(
    state: Arc<AppState>,
    ct: CancellationToken,
) -> Result<tokio::task::JoinHandle<()>> {
    let path = state.socket_path.clone();
    remove_stale_socket(&path)?;

    let listener_name = path
        .as_path()
        .to_fs_name::<GenericFilePath>()
        .map_err(|err| AppError::Ipc(format!("invalid socket path {}: {err}", path.display())))?;

    let listener = ListenerOptions::new()
        .name(listener_name)
        .create_tokio()
        .map_err(|err| AppError::Ipc(format!("failed to create ipc listener: {err}")))?;

    info!(socket = %path.display(), "IPC server listening");

    let handle = tokio::spawn(async move {
        let span = info_span!("ipc_server", socket = %path.display());
        async move {
            loop {
                tokio::select! {
                    () = ct.cancelled() => {
                        info!("IPC server shutting down");
                        break;
                    }
                    accept_result = listener.accept() => {
                        match accept_result {
                            Ok(stream) => {
                                let state = Arc::clone(&state);
                                tokio::spawn(handle_connection(stream, state));
                            }
                            Err(err) => {
                                warn!(%err, "IPC accept failed");
                            }
                        }
                    }
                }
            }
        }
        .instrument(span)
        .await;
    });

    Ok(handle)
}

fn remove_stale_socket(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            debug!(socket = %path.display(), "removed stale socket file");
            Ok(())
        }
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(AppError::Ipc(format!(
            "cannot remove stale socket {}: {err}",
            path.display()
        ))),
    }
}

/// Handle a single IPC client connection.
async fn handle_connection(
    stream: interprocess::local_socket::tokio::Stream,
    state: Arc<AppState>,
) {
    let span = info_span!("ipc_conn");
    async move {
        let (reader, mut writer) = stream.split();
        let mut buf_reader = BufReader::new(reader);
        let mut line = String::new();

        loop {
            line.clear();
            match buf_reader.read_line(&mut line).await {
                Ok(0) => break, // EOF
                Ok(_) => {
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }

                    let response = match IpcRequest::parse(trimmed) {
                        Ok(request) => dispatch(request, &state).await,
                        Err(err) => {
                            warn!(%err, "rejected IPC request");
                            IpcResponse::from_error(&err)
                        }
                    };

                    let mut response_line = serde_json::to_string(&response).unwrap_or_else(|_| {
                        r#"{"ok":false,"error":{"code":"E_INVALID_RESPONSE","message":"serialization failed"}}"#
                            .to_owned()
                    });
                    response_line.push('\n');

                    if let Err(err) = writer.write_all(response_line.as_bytes()).await {
                        warn!(%err, "failed to write ipc response");
                        break;
                    }
                }
                Err(err) => {
                    warn!(%err, "ipc read error");
                    break;
                }
            }
        }

        debug!("IPC connection closed");
    }
    .instrument(span)
    .await;
}

/// Route one parsed request to its handler.
pub async fn dispatch(request: IpcRequest, state: &Arc<AppState>) -> IpcResponse {
    let span = info_span!("ipc_command", action = request.action());
    async move {
        let result = match request {
            IpcRequest::Ping => Ok(json!({ "pong": true })),
            IpcRequest::Status => Ok(json!(state.status().await)),
            IpcRequest::StartAgent {
                agent_type,
                prompt,
                count,
                parent_session_id,
                model,
                runtime,
                metadata,
            } => {
                handle_start_agent(
                    state,
                    StartAgent {
                        agent_type,
                        prompt,
                        count,
                        parent_session_id,
                        model,
                        runtime,
                        metadata,
                    },
                )
                .await
            }
            IpcRequest::Checkout { session_id } => handle_checkout(state, &session_id).await,
            IpcRequest::Message { session_id, text } => state
                .agents
                .deliver_message(&session_id, &text)
                .await
                .map(|()| json!({ "session_id": session_id, "delivered": true })),
            IpcRequest::Interrupt { session_id, signal } => state
                .agents
                .interrupt(&session_id, signal.as_deref())
                .await
                .map(|()| json!({ "session_id": session_id, "status": "interrupted" })),
            IpcRequest::Wait {
                session_ids,
                mode,
                timeout_ms,
            } => handle_wait(state, &session_ids, mode, timeout_ms).await,
        };

        match result {
            Ok(value) => IpcResponse::success(value),
            Err(err) => {
                warn!(%err, "IPC command failed");
                IpcResponse::from_error(&err)
            }
        }
    }
    .instrument(span)
    .await
}

struct StartAgent {
    agent_type: String,
    prompt: String,
    count: u32,
    parent_session_id: Option<String>,
    model: Option<String>,
    runtime: Option<RuntimeKind>,
    metadata: Metadata,
}

/// Spawn agents, pick their backend and start execution.
async fn handle_start_agent(
    state: &Arc<AppState>,
    request: StartAgent,
) -> Result<serde_json::Value> {
    let mut definition = state.config.agent_definition(&request.agent_type).cloned();
    if let Some(hint) = request.runtime {
        definition
            .get_or_insert_with(|| AgentDefinition {
                name: request.agent_type.clone(),
                model: None,
                runtime: None,
            })
            .runtime = Some(hint);
    }

    let decision = runtime::select(
        definition.as_ref(),
        request.model.as_deref(),
        &state.config.runtime,
    );
    info!(
        runtime = %decision.runtime,
        fallback = ?decision.fallback_runtime,
        reason = %decision.reason,
        "runtime selected"
    );

    let mut metadata = request.metadata;
    let decision_value = serde_json::to_value(&decision)
        .map_err(|e| AppError::InvalidPayload(format!("cannot encode runtime decision: {e}")))?;
    metadata.insert("runtime".into(), decision_value);

    let session_ids = state
        .agents
        .spawn(SpawnRequest {
            agent_type: request.agent_type,
            prompt: request.prompt.clone(),
            count: request.count,
            parent_session_id: request.parent_session_id,
            metadata,
        })
        .await?;

    for id in &session_ids {
        drop(
            state
                .executor
                .launch(id.clone(), request.prompt.clone(), decision.clone()),
        );
    }

    Ok(json!({ "session_ids": session_ids, "runtime": decision }))
}

/// Persisted session, live agent state, progress and process detail.
async fn handle_checkout(state: &Arc<AppState>, session_id: &str) -> Result<serde_json::Value> {
    let session = state.sessions.require(session_id).await?;
    let agent = state.agents.snapshot(session_id).await;
    let progress = summarize(&state.log.read(session_id)?);
    let children: Vec<String> = state
        .sessions
        .list_children(session_id)
        .await?
        .into_iter()
        .map(|s| s.id)
        .collect();
    let process = state.processes.get_current(session_id).await?;

    Ok(json!({
        "session": session,
        "agent": agent,
        "progress": progress,
        "children": children,
        "process": process,
        "log_path": state.log.path(session_id).display().to_string(),
    }))
}

async fn handle_wait(
    state: &Arc<AppState>,
    session_ids: &[String],
    mode: WaitMode,
    timeout_ms: Option<u64>,
) -> Result<serde_json::Value> {
    let timeout = timeout_ms.map_or_else(|| state.config.wait_timeout(), Duration::from_millis);
    let report = wait_for_sessions(&state.agents, &state.log, session_ids, mode, timeout).await?;
    serde_json::to_value(&report)
        .map_err(|e| AppError::InvalidPayload(format!("cannot encode wait report: {e}")))
}

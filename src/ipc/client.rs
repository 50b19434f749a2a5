//! CLI-side socket client.
//!
//! [`send_request`] dials an instance, writes one request line and reads
//! the first complete response. The whole exchange runs inside a single
//! `tokio::time::timeout`, so exactly one of response, timeout or transport
//! error settles it, and the stream is dropped once on every path.

use std::path::Path;
use std::time::Duration;

use interprocess::local_socket::{tokio::prelude::*, GenericFilePath};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info_span, Instrument};

use crate::errors::codes;
use crate::{AppError, Result};

use super::protocol::{IpcRequest, IpcResponse};

/// Send `request` to the instance listening on `socket_path`.
///
/// A timeout, an empty reply or an unparsable reply resolves to an
/// `ok: false` response with `E_TIMEOUT`, `E_NO_RESPONSE` or
/// `E_INVALID_RESPONSE`.
///
/// # Errors
///
/// Returns `AppError::Ipc` when the request could not be delivered: the
/// socket cannot be dialled, written or read.
pub async fn send_request(
    socket_path: &Path,
    request: &IpcRequest,
    timeout: Duration,
) -> Result<IpcResponse> {
    let span = info_span!("ipc_request", action = request.action(), socket = %socket_path.display());
    async move {
        match tokio::time::timeout(timeout, exchange(socket_path, request)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                debug!(timeout_ms = timeout.as_millis(), "IPC request timed out");
                Ok(IpcResponse::failure(
                    codes::TIMEOUT,
                    format!("no response within {}ms", timeout.as_millis()),
                ))
            }
        }
    }
    .instrument(span)
    .await
}

async fn exchange(socket_path: &Path, request: &IpcRequest) -> Result<IpcResponse> {
    let name = socket_path
        .to_fs_name::<GenericFilePath>()
        .map_err(|err| AppError::Ipc(format!("invalid socket path: {err}")))?;
    let mut stream = interprocess::local_socket::tokio::Stream::connect(name)
        .await
        .map_err(|err| {
            AppError::Ipc(format!(
                "cannot connect to {}: {err}",
                socket_path.display()
            ))
        })?;

    let mut line = serde_json::to_vec(request)
        .map_err(|err| AppError::Ipc(format!("cannot encode request: {err}")))?;
    line.push(b'\n');
    stream
        .write_all(&line)
        .await
        .map_err(|err| AppError::Ipc(format!("failed to send request: {err}")))?;

    let mut buffer = Vec::new();
    let mut chunk = [0_u8; 4096];
    loop {
        let read = stream
            .read(&mut chunk)
            .await
            .map_err(|err| AppError::Ipc(format!("failed to read response: {err}")))?;
        if read == 0 {
            return Ok(if buffer.iter().all(u8::is_ascii_whitespace) {
                IpcResponse::failure(codes::NO_RESPONSE, "connection closed without a response")
            } else {
                parse_response(&buffer)
            });
        }
        buffer.extend_from_slice(&chunk[..read]);
        if let Some(end) = buffer.iter().position(|b| *b == b'\n') {
            return Ok(parse_response(&buffer[..end]));
        }
    }
}

/// Decode one response message.
#[must_use]
pub fn parse_response(bytes: &[u8]) -> IpcResponse {
    match serde_json::from_slice::<IpcResponse>(bytes) {
        Ok(response) => response,
        Err(err) => IpcResponse::failure(
            codes::INVALID_RESPONSE,
            format!("unparsable response: {err}"),
        ),
    }
}

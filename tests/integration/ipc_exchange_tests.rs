//! End-to-end request/response exchanges over the instance socket.

use std::path::{Path, PathBuf};
use std::time::Duration;

use agent_conductor::errors::codes;
use agent_conductor::ipc::client::parse_response;
use agent_conductor::ipc::server::spawn_ipc_server;
use agent_conductor::ipc::{send_request, IpcRequest};
use agent_conductor::orchestrator::WaitMode;
use agent_conductor::AppError;
use interprocess::local_socket::{tokio::prelude::*, GenericFilePath, ListenerOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;

use super::test_helpers::{instance, instance_with, sh_command, TestInstance};

const TIMEOUT: Duration = Duration::from_secs(5);

fn serve(env: &TestInstance) -> CancellationToken {
    let ct = CancellationToken::new();
    drop(spawn_ipc_server(std::sync::Arc::clone(&env.state), ct.clone()).expect("server"));
    ct
}

fn listener(path: &Path) -> interprocess::local_socket::tokio::Listener {
    let name = path.to_fs_name::<GenericFilePath>().expect("socket name");
    ListenerOptions::new()
        .name(name)
        .create_tokio()
        .expect("listener")
}

async fn raw_exchange(path: &Path, line: &str) -> String {
    let name = path.to_fs_name::<GenericFilePath>().expect("socket name");
    let stream = interprocess::local_socket::tokio::Stream::connect(name)
        .await
        .expect("connect");
    let (reader, mut writer) = stream.split();
    writer.write_all(line.as_bytes()).await.expect("write");
    writer.write_all(b"\n").await.expect("newline");
    let mut reply = String::new();
    BufReader::new(reader)
        .read_line(&mut reply)
        .await
        .expect("read");
    reply
}

#[tokio::test]
async fn ping_round_trip() {
    let env = instance().await;
    let ct = serve(&env);

    let response = send_request(&env.state.socket_path, &IpcRequest::Ping, TIMEOUT)
        .await
        .expect("delivered");
    assert!(response.ok);
    assert_eq!(response.result.expect("result")["pong"], true);
    ct.cancel();
}

#[tokio::test]
async fn stale_socket_file_is_replaced() {
    let env = instance().await;
    std::fs::write(&env.state.socket_path, b"left behind").expect("stale file");
    let ct = serve(&env);

    let response = send_request(&env.state.socket_path, &IpcRequest::Status, TIMEOUT)
        .await
        .expect("delivered");
    assert!(response.ok);
    let result = response.result.expect("result");
    assert_eq!(result["instance_id"], env.state.instance_id.as_str());
    assert!(result["agents"].as_array().expect("agents").is_empty());
    ct.cancel();
}

#[tokio::test]
async fn start_agent_then_wait_until_done() {
    let env = instance_with(|config| {
        config.runtime.commands.claude = sh_command(r#"echo '{"result":"mapped"}'"#);
    })
    .await;
    let ct = serve(&env);

    let start = send_request(
        &env.state.socket_path,
        &IpcRequest::StartAgent {
            agent_type: "explore".into(),
            prompt: "map the crate".into(),
            count: 2,
            parent_session_id: None,
            model: None,
            runtime: None,
            metadata: serde_json::Map::new(),
        },
        TIMEOUT,
    )
    .await
    .expect("delivered");
    assert!(start.ok, "{start:?}");
    let result = start.result.expect("result");
    assert_eq!(result["runtime"]["runtime"], "claude");
    let ids: Vec<String> = serde_json::from_value(result["session_ids"].clone()).expect("ids");
    assert_eq!(ids.len(), 2);

    let wait = send_request(
        &env.state.socket_path,
        &IpcRequest::Wait {
            session_ids: ids.clone(),
            mode: WaitMode::All,
            timeout_ms: Some(5_000),
        },
        Duration::from_secs(10),
    )
    .await
    .expect("delivered");
    assert!(wait.ok, "{wait:?}");
    let report = wait.result.expect("report");
    assert_eq!(report["timed_out"], false);
    for summary in report["sessions"].as_array().expect("sessions") {
        assert_eq!(summary["status"], "done");
        assert_eq!(summary["progress"]["final_response"], "mapped");
    }

    let checkout = send_request(
        &env.state.socket_path,
        &IpcRequest::Checkout {
            session_id: ids[0].clone(),
        },
        TIMEOUT,
    )
    .await
    .expect("delivered");
    let detail = checkout.result.expect("detail");
    assert_eq!(detail["session"]["id"], ids[0].as_str());
    assert_eq!(detail["session"]["metadata"]["runtime"]["runtime"], "claude");
    assert_eq!(detail["process"]["exit_code"], 0);
    ct.cancel();
}

#[tokio::test]
async fn unknown_session_maps_to_not_found() {
    let env = instance().await;
    let ct = serve(&env);

    let response = send_request(
        &env.state.socket_path,
        &IpcRequest::Interrupt {
            session_id: "ghost".into(),
            signal: None,
        },
        TIMEOUT,
    )
    .await
    .expect("delivered");
    assert!(!response.ok);
    assert_eq!(response.error_code(), Some(codes::NOT_FOUND));
    ct.cancel();
}

#[tokio::test]
async fn malformed_requests_get_error_responses() {
    let env = instance().await;
    let ct = serve(&env);

    let reply = raw_exchange(&env.state.socket_path, r#"{"action":"explode"}"#).await;
    let response = parse_response(reply.trim().as_bytes());
    assert_eq!(response.error_code(), Some(codes::INVALID_ACTION));

    let reply = raw_exchange(&env.state.socket_path, "not json at all").await;
    let response = parse_response(reply.trim().as_bytes());
    assert_eq!(response.error_code(), Some(codes::INVALID_PAYLOAD));
    ct.cancel();
}

#[tokio::test]
async fn silent_server_settles_as_timeout() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("silent.sock");
    let listener = listener(&path);
    let server = tokio::spawn(async move {
        let mut held = Vec::new();
        loop {
            match listener.accept().await {
                Ok(stream) => held.push(stream),
                Err(_) => return,
            }
        }
    });

    let response = send_request(&path, &IpcRequest::Ping, Duration::from_millis(50))
        .await
        .expect("timeout is a response, not an error");
    assert!(!response.ok);
    assert_eq!(response.error_code(), Some(codes::TIMEOUT));
    server.abort();
}

#[tokio::test]
async fn closing_without_reply_is_no_response() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("mute.sock");
    let listener = listener(&path);
    let server = tokio::spawn(async move {
        let stream = listener.accept().await.expect("accept");
        let (reader, _writer) = stream.split();
        let mut line = String::new();
        BufReader::new(reader)
            .read_line(&mut line)
            .await
            .expect("read request");
    });

    let response = send_request(&path, &IpcRequest::Ping, TIMEOUT)
        .await
        .expect("delivered");
    assert!(!response.ok);
    assert_eq!(response.error_code(), Some(codes::NO_RESPONSE));
    server.await.expect("server task");
}

#[tokio::test]
async fn missing_socket_is_a_transport_error() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path: PathBuf = dir.path().join("nobody-home.sock");

    let err = send_request(&path, &IpcRequest::Ping, TIMEOUT)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::Ipc(_)));
    assert_eq!(err.code(), codes::TRANSPORT);
}

//! Integration tests for multi-session waits.

use std::time::Duration;

use tokio::time::Instant;

use agent_conductor::models::agent::AgentStatus;
use agent_conductor::models::session::SessionStatus;
use agent_conductor::orchestrator::{wait_for_sessions, WaitMode};
use agent_conductor::session_log::LogEvent;
use agent_conductor::AppError;

use super::test_helpers::{eventually, instance, spawn_one};

#[tokio::test]
async fn all_mode_returns_once_every_session_finishes() {
    let env = instance().await;
    let a = spawn_one(&env.state, "build").await;
    let b = spawn_one(&env.state, "test").await;

    let agents = env.state.agents.clone();
    let (a2, b2) = (a.clone(), b.clone());
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(30)).await;
        agents.complete_agent(&a2, "built").await.expect("complete a");
        tokio::time::sleep(Duration::from_millis(30)).await;
        agents.fail_agent(&b2, "tests red").await.expect("fail b");
    });

    let report = wait_for_sessions(
        &env.state.agents,
        &env.state.log,
        &[a.clone(), b.clone()],
        WaitMode::All,
        Duration::from_secs(5),
    )
    .await
    .expect("wait");

    assert!(!report.timed_out);
    assert_eq!(report.mode, WaitMode::All);
    assert_eq!(report.sessions.len(), 2);
    assert_eq!(report.sessions[0].session_id, a);
    assert_eq!(report.sessions[0].status, SessionStatus::Done);
    assert_eq!(
        report.sessions[0].progress.final_response.as_deref(),
        Some("built")
    );
    assert_eq!(report.sessions[1].status, SessionStatus::Failed);
    assert_eq!(report.sessions[1].agent_status, Some(AgentStatus::Failed));
    assert_eq!(report.sessions[1].progress.error.as_deref(), Some("tests red"));
}

#[tokio::test]
async fn any_mode_returns_after_first_finish() {
    let env = instance().await;
    let fast = spawn_one(&env.state, "explore").await;
    let slow = spawn_one(&env.state, "explore").await;

    let agents = env.state.agents.clone();
    let fast2 = fast.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        agents.complete_agent(&fast2, "found it").await.expect("complete");
    });

    let report = wait_for_sessions(
        &env.state.agents,
        &env.state.log,
        &[slow.clone(), fast.clone()],
        WaitMode::Any,
        Duration::from_secs(5),
    )
    .await
    .expect("wait");

    assert!(!report.timed_out);
    assert_eq!(report.sessions[0].session_id, slow);
    assert_eq!(report.sessions[0].status, SessionStatus::Running);
    assert_eq!(report.sessions[1].status, SessionStatus::Done);
}

#[tokio::test]
async fn bound_elapsing_reports_timed_out_with_progress() {
    let env = instance().await;
    let id = spawn_one(&env.state, "build").await;
    env.state.log.append_or_warn(
        &id,
        LogEvent::FileEdited {
            path: "src/main.rs".into(),
        },
    );

    let report = wait_for_sessions(
        &env.state.agents,
        &env.state.log,
        std::slice::from_ref(&id),
        WaitMode::All,
        Duration::from_millis(50),
    )
    .await
    .expect("wait");

    assert!(report.timed_out);
    assert_eq!(report.sessions[0].status, SessionStatus::Running);
    assert_eq!(
        report.sessions[0].progress.files_edited,
        vec!["src/main.rs".to_owned()]
    );
}

#[tokio::test]
async fn already_finished_sessions_return_immediately() {
    let env = instance().await;
    let id = spawn_one(&env.state, "build").await;
    env.state.agents.interrupt(&id, None).await.expect("interrupt");
    env.state.agents.remove(&id).await.expect("handle removed");

    let report = wait_for_sessions(
        &env.state.agents,
        &env.state.log,
        std::slice::from_ref(&id),
        WaitMode::All,
        Duration::from_secs(5),
    )
    .await
    .expect("wait");
    assert!(!report.timed_out);
    assert_eq!(report.sessions[0].status, SessionStatus::Interrupted);
    assert!(report.sessions[0].agent_status.is_none());
}

#[tokio::test]
async fn empty_and_unknown_ids_are_rejected() {
    let env = instance().await;
    let err = wait_for_sessions(
        &env.state.agents,
        &env.state.log,
        &[],
        WaitMode::Any,
        Duration::from_millis(10),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    let err = wait_for_sessions(
        &env.state.agents,
        &env.state.log,
        &["ghost".to_owned()],
        WaitMode::All,
        Duration::from_millis(10),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn shorter_concurrent_wait_does_not_cut_the_overall_bound() {
    let env = instance().await;
    let id = spawn_one(&env.state, "build").await;

    let agents = env.state.agents.clone();
    let short_id = id.clone();
    let short = tokio::spawn(async move { agents.wait(&short_id, Duration::from_millis(50)).await });
    let agents = env.state.agents.clone();
    assert!(
        eventually(Duration::from_secs(1), || {
            let agents = agents.clone();
            async move { agents.pending_wait_count().await == 1 }
        })
        .await,
        "short wait in flight"
    );

    let agents = env.state.agents.clone();
    let done_id = id.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        agents.complete_agent(&done_id, "late but fine").await.expect("complete");
    });

    let started = Instant::now();
    let report = wait_for_sessions(
        &env.state.agents,
        &env.state.log,
        std::slice::from_ref(&id),
        WaitMode::All,
        Duration::from_secs(5),
    )
    .await
    .expect("wait");

    assert!(!report.timed_out, "returned after {:?}", started.elapsed());
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(report.sessions[0].status, SessionStatus::Done);
    let short = short.await.expect("short wait task").unwrap_err();
    assert!(matches!(short, AppError::Timeout(_)));
}

#[tokio::test]
async fn unsupervised_session_is_waited_on_through_the_store() {
    let env = instance().await;
    let id = spawn_one(&env.state, "build").await;
    env.state.agents.remove(&id).await.expect("handle removed");

    let sessions = env.state.sessions.clone();
    let done_id = id.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        sessions
            .finish(&done_id, SessionStatus::Done, Some("finished elsewhere".into()))
            .await
            .expect("finish");
    });

    let report = wait_for_sessions(
        &env.state.agents,
        &env.state.log,
        std::slice::from_ref(&id),
        WaitMode::All,
        Duration::from_secs(5),
    )
    .await
    .expect("wait");
    assert!(!report.timed_out);
    assert_eq!(report.sessions[0].status, SessionStatus::Done);
    assert!(report.sessions[0].agent_status.is_none());
}

#[tokio::test]
async fn unsupervised_running_session_times_out_only_at_the_bound() {
    let env = instance().await;
    let id = spawn_one(&env.state, "build").await;
    env.state.agents.remove(&id).await.expect("handle removed");

    let started = Instant::now();
    let report = wait_for_sessions(
        &env.state.agents,
        &env.state.log,
        std::slice::from_ref(&id),
        WaitMode::All,
        Duration::from_millis(150),
    )
    .await
    .expect("wait");
    assert!(report.timed_out);
    assert!(started.elapsed() >= Duration::from_millis(150));
    assert_eq!(report.sessions[0].status, SessionStatus::Running);
}

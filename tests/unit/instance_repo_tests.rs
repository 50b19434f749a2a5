//! Unit tests for `InstanceRepo`.

use std::path::PathBuf;
use std::sync::Arc;

use agent_conductor::persistence::{db, instance_repo::InstanceRepo};
use agent_conductor::registry::InstanceRegistryEntry;
use agent_conductor::AppError;

fn entry(id: &str) -> InstanceRegistryEntry {
    let now = chrono::Utc::now();
    InstanceRegistryEntry {
        instance_id: id.to_owned(),
        pid: 31337,
        tty: Some("/dev/pts/1".into()),
        project_hash: "abcdef0123456789".into(),
        project_root: PathBuf::from("/work/project"),
        socket_path: PathBuf::from("/tmp/acd-abcdef012345-deadbeef.sock"),
        started_at: now,
        updated_at: now,
        ended_at: None,
        exit_code: None,
    }
}

async fn repo() -> InstanceRepo {
    InstanceRepo::new(Arc::new(db::connect_memory().await.expect("db")))
}

#[tokio::test]
async fn upsert_then_get() {
    let repo = repo().await;
    let e = entry("inst-1");
    repo.upsert(&e).await.expect("upsert");

    let loaded = repo.get_by_id("inst-1").await.expect("get").expect("some");
    assert_eq!(loaded.pid, 31337);
    assert_eq!(loaded.tty.as_deref(), Some("/dev/pts/1"));
    assert_eq!(loaded.socket_path, e.socket_path);
    assert!(loaded.ended_at.is_none());
}

#[tokio::test]
async fn upsert_replaces_existing_row() {
    let repo = repo().await;
    let mut e = entry("inst-1");
    repo.upsert(&e).await.expect("first");
    e.pid = 7;
    repo.upsert(&e).await.expect("second");

    let loaded = repo.get_by_id("inst-1").await.expect("get").expect("some");
    assert_eq!(loaded.pid, 7);
}

#[tokio::test]
async fn mark_ended_keeps_first_end_time() {
    let repo = repo().await;
    repo.upsert(&entry("inst-1")).await.expect("upsert");

    repo.mark_ended("inst-1", None).await.expect("first");
    let first = repo
        .get_by_id("inst-1")
        .await
        .expect("get")
        .expect("some")
        .ended_at;
    assert!(first.is_some());

    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    repo.mark_ended("inst-1", Some(0)).await.expect("second");
    let loaded = repo.get_by_id("inst-1").await.expect("get").expect("some");
    assert_eq!(loaded.ended_at, first);
    assert_eq!(loaded.exit_code, Some(0));
}

#[tokio::test]
async fn mark_ended_unknown_is_not_found() {
    let repo = repo().await;
    let err = repo.mark_ended("ghost", Some(0)).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

//! Stale-instance reconciliation against real OS processes.
#![cfg(unix)]

use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use agent_conductor::persistence::{db, instance_repo::InstanceRepo};
use agent_conductor::registry::{resolve_target, InstanceRegistry};
use agent_conductor::AppError;

fn open_registry(root: &Path) -> InstanceRegistry {
    InstanceRegistry::new(
        root.to_path_buf(),
        root.join("run"),
        Duration::from_secs(5),
        Duration::from_millis(5),
    )
}

/// Start and reap a short-lived process, returning a pid that is no
/// longer running.
fn dead_pid() -> u32 {
    let mut child = Command::new("sleep").arg("30").spawn().expect("spawn sleep");
    let pid = child.id();
    child.kill().expect("kill");
    child.wait().expect("reap");
    pid
}

#[test]
fn dead_instance_is_marked_ended_on_list() {
    let dir = tempfile::tempdir().expect("tempdir");
    let registry = open_registry(dir.path());
    registry
        .register("gone", dead_pid(), None, &dir.path().join("gone.sock"))
        .expect("register dead");
    registry
        .register("here", std::process::id(), None, &dir.path().join("here.sock"))
        .expect("register live");

    let entries = registry.list().expect("list");
    let gone = entries.iter().find(|e| e.instance_id == "gone").expect("gone");
    let here = entries.iter().find(|e| e.instance_id == "here").expect("here");
    assert!(gone.ended_at.is_some());
    assert!(gone.exit_code.is_none());
    assert!(here.is_live());

    let again = registry.list().expect("second list");
    let gone_again = again.iter().find(|e| e.instance_id == "gone").expect("gone");
    assert_eq!(gone_again.ended_at, gone.ended_at);
}

#[test]
fn stale_instances_are_not_resolution_targets() {
    let dir = tempfile::tempdir().expect("tempdir");
    let registry = open_registry(dir.path());
    registry
        .register("gone", dead_pid(), None, &dir.path().join("gone.sock"))
        .expect("register dead");

    let entries = registry.list().expect("list");
    let err = resolve_target(&entries, None).unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));

    assert_eq!(registry.prune_ended().expect("prune"), vec!["gone".to_owned()]);
    assert!(registry.list().expect("list").is_empty());
}

#[tokio::test]
async fn clean_shutdown_records_exit_in_both_stores() {
    let dir = tempfile::tempdir().expect("tempdir");
    let registry = open_registry(dir.path());
    let repo = InstanceRepo::new(Arc::new(db::connect_memory().await.expect("db")));

    let entry = registry
        .register("inst", std::process::id(), None, &dir.path().join("inst.sock"))
        .expect("register");
    repo.upsert(&entry).await.expect("upsert");

    repo.mark_ended("inst", Some(0)).await.expect("db end");
    registry.mark_ended("inst", Some(0)).expect("registry end");

    let listed = registry.list().expect("list");
    assert_eq!(listed[0].exit_code, Some(0));
    assert!(listed[0].ended_at.is_some());
    let row = repo.get_by_id("inst").await.expect("get").expect("row");
    assert_eq!(row.exit_code, Some(0));
    assert!(row.ended_at.is_some());
}

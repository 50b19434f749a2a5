//! Unit tests for the session execution log and its progress summary.

use std::io::Write;

use agent_conductor::session_log::{summarize, LogEntry, LogEvent, SessionLogStore};

fn store() -> (tempfile::TempDir, SessionLogStore) {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = SessionLogStore::new(dir.path().join("logs")).expect("store");
    (dir, store)
}

#[test]
fn new_creates_log_directory() {
    let (dir, store) = store();
    assert!(dir.path().join("logs").is_dir());
    assert_eq!(store.log_dir(), dir.path().join("logs"));
}

#[test]
fn append_writes_one_json_line_per_event() {
    let (_dir, store) = store();
    store
        .append("s1", LogEvent::System { message: "spawned".into() })
        .expect("append");
    store
        .append("s1", LogEvent::FileEdited { path: "src/lib.rs".into() })
        .expect("append");

    let raw = std::fs::read_to_string(store.path("s1")).expect("read");
    let lines: Vec<&str> = raw.lines().collect();
    assert_eq!(lines.len(), 2);

    let first: serde_json::Value = serde_json::from_str(lines[0]).expect("json");
    assert_eq!(first["type"], "system");
    assert_eq!(first["message"], "spawned");
    assert!(first["timestamp"].is_string());

    let second: serde_json::Value = serde_json::from_str(lines[1]).expect("json");
    assert_eq!(second["type"], "file_edited");
}

#[test]
fn read_missing_log_is_empty() {
    let (_dir, store) = store();
    assert!(store.read("never-written").expect("read").is_empty());
}

#[test]
fn read_skips_malformed_lines() {
    let (_dir, store) = store();
    store
        .append("s1", LogEvent::Output { text: "hello".into() })
        .expect("append");
    {
        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(store.path("s1"))
            .expect("open");
        writeln!(file, "this is not json").expect("write");
        writeln!(file).expect("blank");
    }
    store
        .append("s1", LogEvent::Result { text: "done".into() })
        .expect("append");

    let entries = store.read("s1").expect("read");
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[1].event, LogEvent::Result { text: "done".into() });
}

#[test]
fn summary_collects_files_errors_and_result() {
    let entries: Vec<LogEntry> = [
        LogEvent::User { message: "fix it".into() },
        LogEvent::FileEdited { path: "src/a.rs".into() },
        LogEvent::FileCreated { path: "src/b.rs".into() },
        LogEvent::FileEdited { path: "src/a.rs".into() },
        LogEvent::FileEdited { path: "src/b.rs".into() },
        LogEvent::Output { text: "working".into() },
        LogEvent::Error { message: "flaky test".into() },
        LogEvent::Result { text: "fixed".into() },
    ]
    .into_iter()
    .map(LogEntry::now)
    .collect();

    let progress = summarize(&entries);
    assert_eq!(progress.files_edited, vec!["src/a.rs".to_owned()]);
    assert_eq!(progress.files_created, vec!["src/b.rs".to_owned()]);
    assert_eq!(progress.error.as_deref(), Some("flaky test"));
    assert_eq!(progress.final_response.as_deref(), Some("fixed"));
}

#[test]
fn summary_falls_back_to_latest_output() {
    let entries: Vec<LogEntry> = [
        LogEvent::Output { text: "step 1".into() },
        LogEvent::Output { text: "step 2".into() },
    ]
    .into_iter()
    .map(LogEntry::now)
    .collect();

    let progress = summarize(&entries);
    assert_eq!(progress.final_response.as_deref(), Some("step 2"));
    assert!(progress.error.is_none());
}

#[test]
fn empty_log_summarizes_to_nothing() {
    let progress = summarize(&[]);
    assert!(progress.files_edited.is_empty());
    assert!(progress.files_created.is_empty());
    assert!(progress.final_response.is_none());
}

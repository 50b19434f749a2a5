//! Progress summaries derived from a session's execution log.

use serde::{Deserialize, Serialize};

use super::{LogEntry, LogEvent};

/// What a session has done so far.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct SessionProgress {
    /// Files modified, in first-touch order.
    pub files_edited: Vec<String>,
    /// Files created, in first-touch order.
    pub files_created: Vec<String>,
    /// Most recent error.
    pub error: Option<String>,
    /// Final response, or the latest output line when no result exists yet.
    pub final_response: Option<String>,
}

/// Fold a session log into a progress summary.
#[must_use]
pub fn summarize(entries: &[LogEntry]) -> SessionProgress {
    let mut progress = SessionProgress::default();
    let mut last_output: Option<&str> = None;
    let mut result: Option<&str> = None;

    for entry in entries {
        match &entry.event {
            LogEvent::FileEdited { path } => {
                if !progress.files_edited.contains(path) && !progress.files_created.contains(path)
                {
                    progress.files_edited.push(path.clone());
                }
            }
            LogEvent::FileCreated { path } => {
                if !progress.files_created.contains(path) {
                    progress.files_created.push(path.clone());
                }
            }
            LogEvent::Error { message } => progress.error = Some(message.clone()),
            LogEvent::Output { text } if !text.trim().is_empty() => last_output = Some(text),
            LogEvent::Result { text } => result = Some(text),
            LogEvent::Output { .. } | LogEvent::System { .. } | LogEvent::User { .. } => {}
        }
    }

    progress.final_response = result.or(last_output).map(str::to_owned);
    progress
}

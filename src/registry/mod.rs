//! Durable per-project registry of wrapper instances.
//!
//! One JSON document per project lives in the run directory. Every
//! mutation, including the stale-process reconciliation performed by
//! [`InstanceRegistry::list`], runs under the [`lock::RegistryLock`], which
//! is the only cross-process synchronisation primitive in the system.
//!
//! Loading never fails on bad content: a missing, unparsable, or
//! mismatched document is replaced by an empty one so that registry
//! corruption cannot block instance startup.

pub mod liveness;
pub mod lock;
pub mod paths;

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span, warn};

use crate::config::GlobalConfig;
use crate::{AppError, Result};

use self::lock::{RegistryLock, LOCK_FILE_NAME};

/// Current registry document format version.
pub const REGISTRY_VERSION: u32 = 1;

/// File name of the registry document inside the run directory.
pub const REGISTRY_FILE_NAME: &str = "instances.json";

/// One running or recently ended wrapper instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct InstanceRegistryEntry {
    /// Unique, stable instance identifier.
    pub instance_id: String,
    /// Process id of the wrapper.
    pub pid: u32,
    /// Controlling terminal, when known.
    pub tty: Option<String>,
    /// Hash of the project root.
    pub project_hash: String,
    /// Project root directory.
    pub project_root: PathBuf,
    /// Socket the instance listens on.
    pub socket_path: PathBuf,
    /// Registration time.
    pub started_at: DateTime<Utc>,
    /// Last mutation time.
    pub updated_at: DateTime<Utc>,
    /// End time; `None` means presumed running. Never cleared once set.
    pub ended_at: Option<DateTime<Utc>>,
    /// Exit code reported by the instance.
    pub exit_code: Option<i32>,
}

impl InstanceRegistryEntry {
    /// Whether the instance is presumed running.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.ended_at.is_none()
    }
}

/// Serialized registry document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RegistryDocument {
    /// Format version.
    pub version: u32,
    /// Project this document belongs to.
    pub project_hash: String,
    /// Registered instances.
    pub instances: Vec<InstanceRegistryEntry>,
}

impl RegistryDocument {
    fn empty(project_hash: &str) -> Self {
        Self {
            version: REGISTRY_VERSION,
            project_hash: project_hash.to_owned(),
            instances: Vec::new(),
        }
    }
}

/// Handle on one project's registry document.
#[derive(Debug, Clone)]
pub struct InstanceRegistry {
    project_root: PathBuf,
    project_hash: String,
    run_dir: PathBuf,
    lock_timeout: Duration,
    lock_retry: Duration,
}

impl InstanceRegistry {
    /// Open the registry for a project.
    #[must_use]
    pub fn new(
        project_root: PathBuf,
        run_dir: PathBuf,
        lock_timeout: Duration,
        lock_retry: Duration,
    ) -> Self {
        let project_hash = paths::project_hash(&project_root);
        Self {
            project_root,
            project_hash,
            run_dir,
            lock_timeout,
            lock_retry,
        }
    }

    /// Open the registry described by the global configuration.
    #[must_use]
    pub fn from_config(config: &GlobalConfig) -> Self {
        Self::new(
            config.project_root.clone(),
            config.run_dir(),
            config.lock_timeout(),
            config.lock_retry(),
        )
    }

    /// Project hash guarding the document.
    #[must_use]
    pub fn project_hash(&self) -> &str {
        &self.project_hash
    }

    /// Path of the registry document.
    #[must_use]
    pub fn document_path(&self) -> PathBuf {
        self.run_dir.join(REGISTRY_FILE_NAME)
    }

    /// Path of the lock marker.
    #[must_use]
    pub fn lock_path(&self) -> PathBuf {
        self.run_dir.join(LOCK_FILE_NAME)
    }

    /// Insert or replace the entry for `instance_id`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::LockTimeout` if the lock is not acquired in time,
    /// or `AppError::Io` if the document cannot be written.
    pub fn register(
        &self,
        instance_id: &str,
        pid: u32,
        tty: Option<String>,
        socket_path: &Path,
    ) -> Result<InstanceRegistryEntry> {
        let span = info_span!("registry_register", instance_id, pid);
        let _guard = span.enter();

        let now = Utc::now();
        let entry = InstanceRegistryEntry {
            instance_id: instance_id.to_owned(),
            pid,
            tty,
            project_hash: self.project_hash.clone(),
            project_root: self.project_root.clone(),
            socket_path: socket_path.to_path_buf(),
            started_at: now,
            updated_at: now,
            ended_at: None,
            exit_code: None,
        };

        let stored = entry.clone();
        self.mutate(move |doc| {
            doc.instances.retain(|e| e.instance_id != stored.instance_id);
            doc.instances.push(stored);
            Ok(((), true))
        })?;

        info!(socket = %entry.socket_path.display(), "instance registered");
        Ok(entry)
    }

    /// Record that an instance has ended.
    ///
    /// An already recorded `ended_at` is kept; `exit_code` is always updated.
    ///
    /// # Errors
    ///
    /// Returns `AppError::NotFound` if no entry exists for `instance_id`,
    /// or a lock or I/O error.
    pub fn mark_ended(&self, instance_id: &str, exit_code: Option<i32>) -> Result<()> {
        let span = info_span!("registry_mark_ended", instance_id);
        let _guard = span.enter();

        self.mutate(|doc| {
            let entry = doc
                .instances
                .iter_mut()
                .find(|e| e.instance_id == instance_id)
                .ok_or_else(|| AppError::NotFound(format!("instance {instance_id} not registered")))?;
            let now = Utc::now();
            if entry.ended_at.is_none() {
                entry.ended_at = Some(now);
            }
            entry.exit_code = exit_code;
            entry.updated_at = now;
            Ok(((), true))
        })?;

        info!(?exit_code, "instance marked ended");
        Ok(())
    }

    /// Delete the entry for `instance_id`. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Returns a lock or I/O error.
    pub fn remove(&self, instance_id: &str) -> Result<bool> {
        let removed = self.mutate(|doc| {
            let before = doc.instances.len();
            doc.instances.retain(|e| e.instance_id != instance_id);
            let removed = doc.instances.len() != before;
            Ok((removed, removed))
        })?;
        debug!(instance_id, removed, "registry entry removed");
        Ok(removed)
    }

    /// All entries, after marking entries of dead processes as ended.
    ///
    /// # Errors
    ///
    /// Returns a lock or I/O error, or `AppError::Io` if probing a process
    /// fails for a reason other than "no such process" or "permission
    /// denied".
    pub fn list(&self) -> Result<Vec<InstanceRegistryEntry>> {
        self.mutate(|doc| {
            let changed = reconcile_stale(doc)?;
            Ok((doc.instances.clone(), changed))
        })
    }

    /// Entries still presumed running, after reconciliation.
    ///
    /// # Errors
    ///
    /// Same as [`InstanceRegistry::list`].
    pub fn list_live(&self) -> Result<Vec<InstanceRegistryEntry>> {
        Ok(self.list()?.into_iter().filter(InstanceRegistryEntry::is_live).collect())
    }

    /// Remove every ended entry. Returns the removed instance ids.
    ///
    /// # Errors
    ///
    /// Same as [`InstanceRegistry::list`].
    pub fn prune_ended(&self) -> Result<Vec<String>> {
        let ended: Vec<String> = self
            .list()?
            .into_iter()
            .filter(|e| !e.is_live())
            .map(|e| e.instance_id)
            .collect();
        for id in &ended {
            self.remove(id)?;
        }
        Ok(ended)
    }

    /// Run `apply` on the document under the lock; persist when it reports
    /// a change.
    fn mutate<T>(
        &self,
        apply: impl FnOnce(&mut RegistryDocument) -> Result<(T, bool)>,
    ) -> Result<T> {
        fs::create_dir_all(&self.run_dir).map_err(|err| {
            AppError::Io(format!(
                "failed to create run dir {}: {err}",
                self.run_dir.display()
            ))
        })?;

        let _lock = RegistryLock::acquire(&self.lock_path(), self.lock_timeout, self.lock_retry)?;
        let mut doc = self.load();
        let (value, changed) = apply(&mut doc)?;
        if changed {
            self.save(&doc)?;
        }
        Ok(value)
    }

    fn load(&self) -> RegistryDocument {
        let path = self.document_path();
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) => {
                if err.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %path.display(), %err, "registry unreadable; starting empty");
                }
                return RegistryDocument::empty(&self.project_hash);
            }
        };

        match serde_json::from_str::<RegistryDocument>(&raw) {
            Ok(doc) if doc.version == REGISTRY_VERSION && doc.project_hash == self.project_hash => {
                doc
            }
            Ok(doc) => {
                warn!(
                    version = doc.version,
                    project_hash = %doc.project_hash,
                    "registry document mismatch; starting empty"
                );
                RegistryDocument::empty(&self.project_hash)
            }
            Err(err) => {
                warn!(%err, "registry document corrupt; starting empty");
                RegistryDocument::empty(&self.project_hash)
            }
        }
    }

    fn save(&self, doc: &RegistryDocument) -> Result<()> {
        let body = serde_json::to_vec_pretty(doc)
            .map_err(|err| AppError::Io(format!("failed to serialize registry: {err}")))?;
        let mut tmp = tempfile::NamedTempFile::new_in(&self.run_dir)
            .map_err(|err| AppError::Io(format!("failed to create registry temp file: {err}")))?;
        tmp.write_all(&body)
            .and_then(|()| tmp.flush())
            .map_err(|err| AppError::Io(format!("failed to write registry: {err}")))?;
        tmp.persist(self.document_path())
            .map_err(|err| AppError::Io(format!("failed to replace registry: {err}")))?;
        Ok(())
    }
}

/// Mark entries whose process no longer exists as ended. Returns whether
/// any entry changed.
fn reconcile_stale(doc: &mut RegistryDocument) -> Result<bool> {
    let mut changed = false;
    for entry in doc.instances.iter_mut().filter(|e| e.ended_at.is_none()) {
        if !liveness::is_process_alive(entry.pid)? {
            let now = Utc::now();
            entry.ended_at = Some(now);
            entry.updated_at = now;
            changed = true;
            info!(instance_id = %entry.instance_id, pid = entry.pid, "stale instance marked ended");
        }
    }
    Ok(changed)
}

/// Pick the instance a CLI request should go to.
///
/// With an explicit selector, matches a live entry by full id or unique id
/// prefix. Without one, exactly one live entry must exist.
///
/// # Errors
///
/// Returns `AppError::NotFound` when nothing matches and
/// `AppError::Ambiguous` when more than one entry matches.
pub fn resolve_target<'a>(
    entries: &'a [InstanceRegistryEntry],
    selector: Option<&str>,
) -> Result<&'a InstanceRegistryEntry> {
    let live = entries.iter().filter(|e| e.is_live());
    let candidates: Vec<&InstanceRegistryEntry> = match selector {
        Some(sel) => {
            if let Some(exact) = entries
                .iter()
                .find(|e| e.is_live() && e.instance_id == sel)
            {
                return Ok(exact);
            }
            live.filter(|e| e.instance_id.starts_with(sel)).collect()
        }
        None => live.collect(),
    };

    match candidates.as_slice() {
        [] => Err(AppError::NotFound(match selector {
            Some(sel) => format!("no running instance matches '{sel}'"),
            None => "no running instance for this project".into(),
        })),
        [only] => Ok(only),
        many => Err(AppError::Ambiguous(format!(
            "{} running instances match; pass --instance with one of: {}",
            many.len(),
            many.iter()
                .map(|e| e.instance_id.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ))),
    }
}

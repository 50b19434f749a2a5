//! Cross-process registry lock built on exclusive file creation.
//!
//! The marker file's existence is the lock. Acquisition retries at a fixed
//! delay until the timeout elapses; the marker is removed when the guard
//! drops, on every exit path. A holder that dies without dropping its guard
//! leaves the marker behind and other callers time out.

use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::{AppError, Result};

/// File name of the lock marker inside the run directory.
pub const LOCK_FILE_NAME: &str = "registry.lock";

/// Held registry lock. Dropping it releases the lock.
#[derive(Debug)]
pub struct RegistryLock {
    path: PathBuf,
}

impl RegistryLock {
    /// Acquire the lock marker at `path`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::LockTimeout` if the marker still exists after
    /// `timeout`, or `AppError::Io` if the marker cannot be created for any
    /// other reason.
    pub fn acquire(path: &Path, timeout: Duration, retry: Duration) -> Result<Self> {
        let started = Instant::now();
        loop {
            match OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(_) => {
                    debug!(path = %path.display(), "registry lock acquired");
                    return Ok(Self {
                        path: path.to_path_buf(),
                    });
                }
                Err(err) if err.kind() == ErrorKind::AlreadyExists => {
                    if started.elapsed() >= timeout {
                        return Err(AppError::LockTimeout(format!(
                            "registry lock {} held for more than {}ms",
                            path.display(),
                            timeout.as_millis()
                        )));
                    }
                    std::thread::sleep(retry);
                }
                Err(err) => {
                    return Err(AppError::Io(format!(
                        "failed to create registry lock {}: {err}",
                        path.display()
                    )));
                }
            }
        }
    }

    /// Path of the marker file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RegistryLock {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), %err, "failed to release registry lock");
        }
    }
}

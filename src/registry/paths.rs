//! Project hashing and socket path derivation.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::{AppError, Result};

/// Hex characters of the project hash kept in identifiers and paths.
pub const PROJECT_HASH_LEN: usize = 16;

/// Trailing characters of the instance id used in socket names.
pub const INSTANCE_SUFFIX_LEN: usize = 8;

/// Longest socket path accepted (macOS `sun_path` is 104 bytes).
pub const MAX_SOCKET_PATH_LEN: usize = 103;

/// Stable hash identifying a project by its root directory.
#[must_use]
pub fn project_hash(project_root: &Path) -> String {
    let digest = Sha256::digest(project_root.to_string_lossy().as_bytes());
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest {
        hex.push_str(&format!("{byte:02x}"));
    }
    hex.truncate(PROJECT_HASH_LEN);
    hex
}

/// Socket path for an instance of a project.
///
/// # Errors
///
/// Returns `AppError::Config` if the resulting path exceeds
/// [`MAX_SOCKET_PATH_LEN`].
pub fn socket_path(socket_dir: &Path, project_hash: &str, instance_id: &str) -> Result<PathBuf> {
    let compact: String = instance_id.chars().filter(|c| *c != '-').collect();
    let start = compact.len().saturating_sub(INSTANCE_SUFFIX_LEN);
    let suffix = compact.get(start..).unwrap_or(&compact);
    let hash = project_hash.get(..12).unwrap_or(project_hash);

    let path = socket_dir.join(format!("acd-{hash}-{suffix}.sock"));
    let len = path.as_os_str().len();
    if len > MAX_SOCKET_PATH_LEN {
        return Err(AppError::Config(format!(
            "socket path {} is {len} bytes, limit is {MAX_SOCKET_PATH_LEN}",
            path.display()
        )));
    }
    Ok(path)
}

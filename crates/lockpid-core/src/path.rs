//! Lock path resolution
//!
//! Maps a requested lock path to the file that actually carries the
//! ownership record. Directories are followed into a fixed child name
//! (`lock` by default) until a non-directory is reached; a target that does
//! not exist yet is synthesized from its canonical parent.

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};

use crate::{Error, Result};

/// Child file name used when the requested path is a directory.
pub const DEFAULT_LOCK_FILE_NAME: &str = "lock";

/// Upper bound on directory descents (`dir/lock/lock/...`).
const MAX_DIRECTORY_DESCENT: usize = 16;

/// A requested lock path together with where it resolved to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockTarget {
    /// The path the caller asked for.
    pub requested: PathBuf,
    /// Canonical path of the lock file.
    pub resolved: PathBuf,
    /// Last modification time, if the lock file already exists.
    pub modified: Option<SystemTime>,
}

impl LockTarget {
    /// Whether the lock file existed at resolution time.
    #[must_use]
    pub const fn exists(&self) -> bool {
        self.modified.is_some()
    }

    /// Age of the lock file relative to `now`. A modification time in the
    /// future counts as age zero.
    #[must_use]
    pub fn age(&self, now: SystemTime) -> Option<Duration> {
        self.modified
            .map(|modified| now.duration_since(modified).unwrap_or(Duration::ZERO))
    }
}

/// Resolve `requested` to its lock file.
///
/// # Errors
///
/// Returns [`Error::PathResolution`] if the path is empty, if neither the
/// target nor its parent directory exist, or if directory indirection nests
/// deeper than the descent limit.
pub async fn resolve(requested: impl AsRef<Path>, lock_file_name: &str) -> Result<LockTarget> {
    let requested = requested.as_ref();
    if requested.as_os_str().is_empty() {
        return Err(Error::path_resolution(requested, "path is empty"));
    }

    let mut candidate = requested.to_path_buf();
    for _ in 0..=MAX_DIRECTORY_DESCENT {
        match tokio::fs::canonicalize(&candidate).await {
            Ok(real) => {
                let metadata = tokio::fs::metadata(&real)
                    .await
                    .map_err(|e| Error::path_resolution(requested, e.to_string()))?;
                if metadata.is_dir() {
                    candidate = real.join(lock_file_name);
                    continue;
                }
                return Ok(LockTarget {
                    requested: requested.to_path_buf(),
                    resolved: real,
                    modified: metadata.modified().ok(),
                });
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                let resolved = synthesize(requested, &candidate).await?;
                return Ok(LockTarget {
                    requested: requested.to_path_buf(),
                    resolved,
                    modified: None,
                });
            }
            Err(e) => return Err(Error::path_resolution(requested, e.to_string())),
        }
    }

    Err(Error::path_resolution(
        requested,
        format!("directory indirection deeper than {MAX_DIRECTORY_DESCENT} levels"),
    ))
}

/// Build the would-be path of a missing lock file from its canonical parent.
async fn synthesize(requested: &Path, candidate: &Path) -> Result<PathBuf> {
    let file_name = candidate
        .file_name()
        .ok_or_else(|| Error::path_resolution(requested, "path has no file name"))?;

    let parent = match candidate.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let real_parent = tokio::fs::canonicalize(parent).await.map_err(|e| {
        Error::path_resolution(
            requested,
            format!("parent directory '{}' is unreachable: {e}", parent.display()),
        )
    })?;

    let is_dir = tokio::fs::metadata(&real_parent)
        .await
        .map(|m| m.is_dir())
        .unwrap_or(false);
    if !is_dir {
        return Err(Error::path_resolution(
            requested,
            format!("parent '{}' is not a directory", real_parent.display()),
        ));
    }

    Ok(real_parent.join(file_name))
}

//! Exclusive advisory lock on a lock file
//!
//! [`FileGuard`] wraps a non-blocking `flock`-style exclusive lock (via `fs2`)
//! on an open descriptor of the lock file. It is the only cross-process
//! serialization primitive in lockpid and is held just long enough to read,
//! verify and rewrite the ownership record.
//!
//! # Design Principles
//!
//! - **Non-blocking**: contention is reported as `Ok(None)`, never waited on here
//! - **Drop-safe**: the advisory lock is released when the guard is dropped
//! - **Inode-checked**: a guard is only handed out for the file currently at the path

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]

use std::{
    fs::File,
    io::{ErrorKind, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    time::SystemTime,
};

use fs2::FileExt;

use crate::{
    record::{OwnershipRecord, MAX_RECORD_BYTES},
    Error, Result,
};

/// An exclusive advisory lock on an open lock file.
#[derive(Debug)]
pub struct FileGuard {
    file: File,
    path: PathBuf,
    released: bool,
}

impl FileGuard {
    /// Try to take the exclusive lock on `path` without blocking.
    ///
    /// The file is opened for append and read, and created if absent.
    /// Returns `Ok(None)` when another descriptor holds the lock, or when the
    /// file was unlinked or replaced between opening and locking it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OsLock`] for any failure other than contention, e.g.
    /// permission denied or a read-only filesystem.
    pub async fn try_acquire(path: impl AsRef<Path>) -> Result<Option<Self>> {
        let path = path.as_ref();
        let os_error = |source| Error::OsLock {
            path: path.to_path_buf(),
            source,
        };

        let file = tokio::fs::OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(path)
            .await
            .map_err(os_error)?
            .into_std()
            .await;

        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => {}
            Err(e) if is_contended(&e) => {
                tracing::trace!("Advisory lock busy: {}", path.display());
                return Ok(None);
            }
            Err(source) => return Err(os_error(source)),
        }

        let guard = Self {
            file,
            path: path.to_path_buf(),
            released: false,
        };

        if !guard.is_current().map_err(os_error)? {
            tracing::debug!(
                "Lock file was replaced while locking, retrying: {}",
                path.display()
            );
            return Ok(None);
        }

        tracing::trace!("Acquired advisory lock: {}", path.display());
        Ok(Some(guard))
    }

    /// Path of the locked file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the locked descriptor is still the file linked at `path`.
    pub(crate) fn is_current(&self) -> std::io::Result<bool> {
        let on_disk = match std::fs::metadata(&self.path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e),
        };
        let held = self.file.metadata()?;
        Ok(same_file(&on_disk, &held))
    }

    /// Read and parse the ownership record from the first bytes of the file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OsLock`] if the file cannot be read.
    pub fn read_record(&mut self) -> Result<Option<OwnershipRecord>> {
        let mut head = Vec::with_capacity(MAX_RECORD_BYTES);
        self.file
            .seek(SeekFrom::Start(0))
            .and_then(|_| {
                (&self.file)
                    .take(MAX_RECORD_BYTES as u64)
                    .read_to_end(&mut head)
            })
            .map_err(|source| Error::OsLock {
                path: self.path.clone(),
                source,
            })?;
        Ok(OwnershipRecord::parse(&head))
    }

    /// Replace the file contents with `record` and flush them to disk.
    ///
    /// Truncate, write and sync run on the blocking pool through a duplicate
    /// of the locked descriptor, which shares its advisory lock.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Write`]; the file may be left truncated.
    pub async fn write_record(&self, record: &OwnershipRecord) -> Result<()> {
        let write_error = |source| Error::Write {
            path: self.path.clone(),
            source,
        };

        let mut file = self.file.try_clone().map_err(write_error)?;
        let contents = record.encode();
        tokio::task::spawn_blocking(move || {
            file.set_len(0)?;
            file.write_all(contents.as_bytes())?;
            file.sync_data()
        })
        .await
        .map_err(std::io::Error::other)
        .and_then(|written| written)
        .map_err(write_error)
    }

    /// Last modification time of the locked file.
    pub fn modified(&self) -> Option<SystemTime> {
        self.file.metadata().and_then(|m| m.modified()).ok()
    }

    /// Unlink the lock file. A file that is already gone counts as removed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Io`] if the unlink fails for another reason.
    pub async fn remove_file(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::io_error(format!(
                "Failed to remove lock file '{}': {e}",
                self.path.display()
            ))),
        }
    }

    /// Release the advisory lock. Safe to call more than once.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if let Err(e) = FileExt::unlock(&self.file) {
            tracing::warn!(
                "Failed to release advisory lock on {}: {e}",
                self.path.display()
            );
        } else {
            tracing::trace!("Released advisory lock: {}", self.path.display());
        }
    }
}

impl Drop for FileGuard {
    fn drop(&mut self) {
        self.release();
    }
}

pub(crate) fn is_contended(err: &std::io::Error) -> bool {
    err.kind() == ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

#[cfg(unix)]
fn same_file(a: &std::fs::Metadata, b: &std::fs::Metadata) -> bool {
    use std::os::unix::fs::MetadataExt;
    a.dev() == b.dev() && a.ino() == b.ino()
}

#[cfg(not(unix))]
fn same_file(_a: &std::fs::Metadata, _b: &std::fs::Metadata) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_acquire_and_release() {
        let temp_dir = TempDir::new().unwrap();
        let lock_path = temp_dir.path().join("test.lock");

        {
            let guard = FileGuard::try_acquire(&lock_path)
                .await
                .unwrap()
                .expect("lock should be free");
            assert!(guard.path().exists());
        }

        // Dropping the first guard frees the lock.
        let again = FileGuard::try_acquire(&lock_path).await.unwrap();
        assert!(again.is_some());
    }

    #[tokio::test]
    async fn test_contention_reports_busy() {
        let temp_dir = TempDir::new().unwrap();
        let lock_path = temp_dir.path().join("contention.lock");

        let mut first = FileGuard::try_acquire(&lock_path).await.unwrap().unwrap();
        let second = FileGuard::try_acquire(&lock_path).await.unwrap();
        assert!(second.is_none());

        first.release();
        let third = FileGuard::try_acquire(&lock_path).await.unwrap();
        assert!(third.is_some());
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let lock_path = temp_dir.path().join("twice.lock");

        let mut guard = FileGuard::try_acquire(&lock_path).await.unwrap().unwrap();
        guard.release();
        guard.release();
        drop(guard);
    }

    #[tokio::test]
    async fn test_write_then_read_record() {
        let temp_dir = TempDir::new().unwrap();
        let lock_path = temp_dir.path().join("record.lock");
        std::fs::write(&lock_path, b"old contents that are longer than the record\n").unwrap();

        let mut guard = FileGuard::try_acquire(&lock_path).await.unwrap().unwrap();
        let record = OwnershipRecord::new(31337, "lockpid hold x");
        guard.write_record(&record).await.unwrap();
        assert_eq!(guard.read_record().unwrap(), Some(record));
        assert_eq!(
            std::fs::read_to_string(&lock_path).unwrap(),
            "31337\nlockpid hold x\n"
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_write_keeps_runtime_and_lock() {
        let temp_dir = TempDir::new().unwrap();
        let lock_path = temp_dir.path().join("synced.lock");

        let mut guard = FileGuard::try_acquire(&lock_path).await.unwrap().unwrap();
        let record = OwnershipRecord::new(4242, "lockpid run x -- true");
        let ticker = tokio::spawn(async { tokio::task::yield_now().await });

        let (written, ticked) = tokio::join!(guard.write_record(&record), ticker);
        written.unwrap();
        ticked.unwrap();

        // The duplicate descriptor used for writing did not drop the lock.
        assert!(FileGuard::try_acquire(&lock_path).await.unwrap().is_none());
        assert_eq!(
            std::fs::read_to_string(&lock_path).unwrap(),
            "4242\nlockpid run x -- true\n"
        );
    }

    #[tokio::test]
    async fn test_empty_file_has_no_record() {
        let temp_dir = TempDir::new().unwrap();
        let lock_path = temp_dir.path().join("empty.lock");

        let mut guard = FileGuard::try_acquire(&lock_path).await.unwrap().unwrap();
        assert_eq!(guard.read_record().unwrap(), None);
        assert!(guard.modified().is_some());
    }

    #[tokio::test]
    async fn test_unlinked_file_is_not_current() {
        let temp_dir = TempDir::new().unwrap();
        let lock_path = temp_dir.path().join("gone.lock");

        let guard = FileGuard::try_acquire(&lock_path).await.unwrap().unwrap();
        assert!(guard.is_current().unwrap());

        guard.remove_file().await.unwrap();
        assert!(!guard.is_current().unwrap());
        // Removing again is not an error.
        guard.remove_file().await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_directory_is_os_lock_failure() {
        let temp_dir = TempDir::new().unwrap();
        let lock_path = temp_dir.path().join("nope").join("x.lock");

        let err = FileGuard::try_acquire(&lock_path).await.unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::OsLockFailure);
    }
}

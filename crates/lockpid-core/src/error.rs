//! Error types for lockpid with categorization:
//!
//! - **Resolution errors**: the lock path cannot be mapped to a lock file (exit code 1)
//! - **System errors**: advisory locking, record writes, other IO (exit code 2)
//! - **Contention**: the wait budget ran out (exit code 3)
//! - **Ownership errors**: unlocking a lock this process does not own (exit code 4)
//!
//! Contention itself is never an error; it is the retry condition inside
//! [`crate::LockManager::lock`]. Only an exhausted wait budget surfaces.

use std::{path::PathBuf, time::Duration};

use strum::{AsRefStr, Display};
use thiserror::Error;

/// Machine-readable error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    PathResolutionFailure,
    TimedOut,
    OsLockFailure,
    WriteFailure,
    OwnershipMismatch,
    NotHeldByThisProcess,
    InvalidConfig,
    IoError,
}

/// Top-level error type for lock operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The requested path (or its parent) could not be resolved.
    #[error("Failed to resolve lock file path '{path}': {reason}")]
    PathResolution { path: PathBuf, reason: String },

    /// Another live process kept the lock for the whole wait budget.
    #[error("Timed out waiting for lock '{path}' after {}ms", waited.as_millis())]
    TimedOut { path: PathBuf, waited: Duration },

    /// Opening or locking the lock file failed for a reason other than contention.
    #[error("Failed to lock '{path}': {source}")]
    OsLock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The ownership record could not be written. The file may be truncated.
    #[error("Failed to write lock file '{path}': {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The lock file names another process as owner.
    #[error("Lock file '{path}' is owned by pid {owner}, not by this process (pid {current})")]
    OwnershipMismatch {
        path: PathBuf,
        owner: u32,
        current: u32,
    },

    /// `unlock` was called for a path this process never locked.
    #[error("Lock '{path}' is not held by this process")]
    NotHeld { path: PathBuf },

    /// Configuration failed to parse or validate.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Other IO failure (config files, signal setup).
    #[error("IO error: {0}")]
    Io(String),
}

impl Error {
    /// Create a configuration error.
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a generic IO error.
    pub fn io_error(msg: impl Into<String>) -> Self {
        Self::Io(msg.into())
    }

    /// Create a path resolution error.
    pub fn path_resolution(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::PathResolution {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// The category of this error.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::PathResolution { .. } => ErrorKind::PathResolutionFailure,
            Self::TimedOut { .. } => ErrorKind::TimedOut,
            Self::OsLock { .. } => ErrorKind::OsLockFailure,
            Self::Write { .. } => ErrorKind::WriteFailure,
            Self::OwnershipMismatch { .. } => ErrorKind::OwnershipMismatch,
            Self::NotHeld { .. } => ErrorKind::NotHeldByThisProcess,
            Self::InvalidConfig(_) => ErrorKind::InvalidConfig,
            Self::Io(_) => ErrorKind::IoError,
        }
    }

    /// Returns the appropriate exit code for this error type.
    ///
    /// Exit code scheme:
    /// - 1: User error (unresolvable path, bad configuration)
    /// - 2: System error (advisory lock, write, IO)
    /// - 3: Timed out under contention
    /// - 4: Ownership error (not ours, never locked)
    pub const fn exit_code(&self) -> i32 {
        match self.kind() {
            ErrorKind::PathResolutionFailure | ErrorKind::InvalidConfig => 1,
            ErrorKind::OsLockFailure | ErrorKind::WriteFailure | ErrorKind::IoError => 2,
            ErrorKind::TimedOut => 3,
            ErrorKind::OwnershipMismatch | ErrorKind::NotHeldByThisProcess => 4,
        }
    }

    /// True for the one error callers usually want to retry at a higher level.
    pub const fn is_timeout(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::invalid_config(format!("Failed to parse config: {err}"))
    }
}

/// Result type alias for lockpid operations
pub type Result<T> = std::result::Result<T, Error>;

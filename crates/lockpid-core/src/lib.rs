//! # lockpid core
//!
//! Cross-process mutual exclusion through pid-stamped lock files.
//!
//! A lock file holds its owner's pid and command line. Contenders read it
//! under a short-lived advisory lock and take over when the owner is gone,
//! its pid was reused by another program, or the file is older than the
//! caller's stale threshold. Within one process locks are re-entrant.
//!
//! ```no_run
//! # async fn demo() -> lockpid_core::Result<()> {
//! use std::time::Duration;
//! use lockpid_core::LockOptions;
//!
//! let handle = lockpid_core::lock("/tmp/build.lock", LockOptions::new().with_wait(Duration::from_secs(4))).await?;
//! // ... exclusive section ...
//! handle.release().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Laws (Compiler Enforced)
//!
//! - No `unwrap()` / `expect()` / `panic!()` outside tests
//! - No `unsafe`

#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]

pub mod config;
mod error;
pub mod exit_guard;
pub mod filelock;
pub mod liveness;
pub mod manager;
pub mod path;
pub mod record;

use std::path::Path;

pub use config::Config;
pub use error::{Error, ErrorKind, Result};
pub use exit_guard::{ExitGuard, ExitScope};
pub use liveness::{LivenessFailurePolicy, ProcessLiveness, ProcessStatus, ProcfsLiveness};
pub use manager::{AcquireState, LockHandle, LockManager, LockOptions, LockReport, LockStatus};
pub use path::LockTarget;
pub use record::OwnershipRecord;

/// Acquire `path` through the process-wide [`LockManager`].
///
/// # Errors
///
/// See [`LockManager::lock`].
pub async fn lock(path: impl AsRef<Path>, options: LockOptions) -> Result<LockHandle> {
    LockManager::global().lock(path, options).await
}

/// Release one hold on `path` through the process-wide [`LockManager`].
///
/// # Errors
///
/// See [`LockManager::unlock`].
pub async fn unlock(path: impl AsRef<Path>) -> Result<()> {
    LockManager::global().unlock(path).await
}

//! Configuration type definitions

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{liveness::LivenessFailurePolicy, manager::LockOptions, path::DEFAULT_LOCK_FILE_NAME};

/// Default retry interval while a lock is contended.
pub const DEFAULT_BACKOFF_MS: u64 = 1000;

/// Root configuration structure
///
/// Loaded from defaults → global → project → env vars → CLI flags
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Sleep between acquisition attempts under contention.
    pub backoff_ms: u64,
    /// Child file name used when a lock path is a directory.
    pub lock_file_name: String,
    /// What to do when an owner's liveness cannot be determined.
    pub liveness_failure: LivenessFailurePolicy,
    /// Default wait budget for the CLI; `None` waits forever.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait_ms: Option<u64>,
    /// Default stale threshold for the CLI; `None` never force-reclaims.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stale_ms: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backoff_ms: DEFAULT_BACKOFF_MS,
            lock_file_name: DEFAULT_LOCK_FILE_NAME.to_string(),
            liveness_failure: LivenessFailurePolicy::default(),
            wait_ms: None,
            stale_ms: None,
        }
    }
}

impl Config {
    /// Retry interval as a `Duration`.
    #[must_use]
    pub const fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    /// Lock options built from the configured defaults.
    #[must_use]
    pub fn lock_options(&self) -> LockOptions {
        LockOptions {
            wait: self.wait_ms.map(Duration::from_millis),
            stale: self.stale_ms.map(Duration::from_millis),
        }
    }
}

/// One config file's settings. Only keys present in the file are `Some`, so
/// a later layer can set any value, including its built-in default.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ConfigLayer {
    pub backoff_ms: Option<u64>,
    pub lock_file_name: Option<String>,
    pub liveness_failure: Option<LivenessFailurePolicy>,
    pub wait_ms: Option<u64>,
    pub stale_ms: Option<u64>,
}

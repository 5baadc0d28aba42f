//! Process liveness lookups
//!
//! The lock protocol only needs one question answered about a recorded pid:
//! is it running, and with what command line. [`ProcessLiveness`] is that
//! seam; [`ProcfsLiveness`] answers it from `/proc/<pid>/cmdline`.

use std::{io::ErrorKind, path::PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// What the liveness lookup observed for one pid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessStatus {
    pub alive: bool,
    /// Command line of the running process; empty when not alive.
    pub command_line: String,
}

impl ProcessStatus {
    /// A live process with the given command line.
    pub fn alive(command_line: impl Into<String>) -> Self {
        Self {
            alive: true,
            command_line: command_line.into(),
        }
    }

    /// No process with that pid.
    #[must_use]
    pub const fn dead() -> Self {
        Self {
            alive: false,
            command_line: String::new(),
        }
    }
}

/// The lookup itself failed, so the owner's status is unknown.
#[derive(Debug, Error)]
pub enum LivenessError {
    #[error("Failed to inspect process {pid} via {path}: {source}")]
    Inspect {
        pid: u32,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Process lookup is not supported on this platform")]
    Unsupported,
}

/// How to treat an owner whose liveness could not be determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LivenessFailurePolicy {
    /// Keep waiting, as if the owner were alive. Stale thresholds and the
    /// caller's wait budget still apply.
    #[default]
    AssumeAlive,
    /// Reclaim the lock, as if the owner were dead.
    AssumeDead,
}

impl std::str::FromStr for LivenessFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "assume-alive" => Ok(Self::AssumeAlive),
            "assume-dead" => Ok(Self::AssumeDead),
            other => Err(format!(
                "unknown liveness policy '{other}' (expected 'assume-alive' or 'assume-dead')"
            )),
        }
    }
}

/// Answers "is pid N alive, and what is it running?".
#[async_trait]
pub trait ProcessLiveness: Send + Sync + std::fmt::Debug {
    async fn query(&self, pid: u32) -> Result<ProcessStatus, LivenessError>;
}

/// Liveness from the Linux procfs.
#[derive(Debug, Clone)]
pub struct ProcfsLiveness {
    root: PathBuf,
}

impl ProcfsLiveness {
    #[must_use]
    pub fn new() -> Self {
        Self::with_root("/proc")
    }

    /// Read from an alternate procfs mount.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl Default for ProcfsLiveness {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProcessLiveness for ProcfsLiveness {
    async fn query(&self, pid: u32) -> Result<ProcessStatus, LivenessError> {
        if !cfg!(target_os = "linux") && !self.root.exists() {
            return Err(LivenessError::Unsupported);
        }

        let path = self.root.join(pid.to_string()).join("cmdline");
        match tokio::fs::read(&path).await {
            Ok(raw) => Ok(ProcessStatus::alive(join_cmdline(&raw))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(ProcessStatus::dead()),
            Err(source) => Err(LivenessError::Inspect { pid, path, source }),
        }
    }
}

/// `/proc/<pid>/cmdline` holds NUL-terminated arguments; join them with spaces.
fn join_cmdline(raw: &[u8]) -> String {
    raw.split(|b| *b == 0)
        .filter(|arg| !arg.is_empty())
        .map(String::from_utf8_lossy)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Command line of the current process, as the liveness lookup reports it.
///
/// Falls back to `std::env::args` when the lookup fails so the lock can still
/// be written; the record then only matches lookups that agree with it.
pub async fn current_command_line(liveness: &dyn ProcessLiveness) -> String {
    let pid = std::process::id();
    match liveness.query(pid).await {
        Ok(status) if status.alive => status.command_line,
        Ok(_) => {
            tracing::warn!("Liveness lookup reports own pid {pid} as dead; using argv");
            std::env::args().collect::<Vec<_>>().join(" ")
        }
        Err(e) => {
            tracing::warn!("Failed to look up own command line: {e}; using argv");
            std::env::args().collect::<Vec<_>>().join(" ")
        }
    }
}

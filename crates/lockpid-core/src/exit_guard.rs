//! Exit-time cleanup of held lock files.
//!
//! Every lock file this process currently owns is registered here. On
//! SIGINT/SIGTERM (Ctrl-C off unix), or when the [`ExitScope`] held by `main`
//! is dropped, the registered files that still carry our pid are deleted
//! synchronously so that other processes do not have to wait for liveness
//! checks to notice we are gone.

use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError},
};

use tokio::task::JoinHandle;

use crate::{
    filelock::is_contended,
    record::{OwnershipRecord, MAX_RECORD_BYTES},
    Result,
};

/// Exit status used after an interrupt signal (128 + SIGINT).
pub const INTERRUPTED_EXIT_CODE: i32 = 130;

/// Exit status used after a terminate signal (128 + SIGTERM).
pub const TERMINATED_EXIT_CODE: i32 = 143;

/// Registry of lock files to delete when the process goes away.
#[derive(Debug, Default)]
pub struct ExitGuard {
    paths: Mutex<BTreeSet<PathBuf>>,
}

impl ExitGuard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry used by [`crate::LockManager::global`].
    pub fn global() -> Arc<Self> {
        static GLOBAL: OnceLock<Arc<ExitGuard>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(Self::new())))
    }

    fn paths(&self) -> MutexGuard<'_, BTreeSet<PathBuf>> {
        self.paths.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Delete `path` at exit unless it is unregistered first.
    pub fn register(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        tracing::trace!("Registered for exit cleanup: {}", path.display());
        self.paths().insert(path);
    }

    /// Stop tracking `path`. Returns whether it was registered.
    pub fn unregister(&self, path: &Path) -> bool {
        self.paths().remove(path)
    }

    pub fn is_registered(&self, path: &Path) -> bool {
        self.paths().contains(path)
    }

    /// Currently registered lock files.
    pub fn registered(&self) -> Vec<PathBuf> {
        self.paths().iter().cloned().collect()
    }

    /// Delete every registered lock file this process still owns and clear
    /// the registry.
    ///
    /// Runs synchronously and never fails. A file whose record names another
    /// pid was taken over and is left alone, as is one that another process
    /// is inspecting right now; files that are already gone are skipped.
    /// Returns how many files were removed.
    pub fn teardown_all(&self) -> usize {
        let paths = std::mem::take(&mut *self.paths());
        let pid = std::process::id();
        let mut removed = 0;
        for path in paths {
            match remove_if_owned(&path, pid) {
                Ok(Teardown::Removed) => {
                    removed += 1;
                    tracing::debug!("Removed lock file at exit: {}", path.display());
                }
                Ok(Teardown::Missing) => {}
                Ok(Teardown::Busy) => {
                    tracing::warn!(
                        "Lock file {} is being inspected by another process, leaving it at exit",
                        path.display()
                    );
                }
                Ok(Teardown::Foreign(Some(owner))) => {
                    tracing::warn!(
                        "Lock file {} now belongs to pid {owner}, leaving it at exit",
                        path.display()
                    );
                }
                Ok(Teardown::Foreign(None)) => {
                    tracing::warn!(
                        "Lock file {} no longer holds our record, leaving it at exit",
                        path.display()
                    );
                }
                Err(e) => {
                    tracing::warn!("Failed to remove lock file {} at exit: {e}", path.display());
                }
            }
        }
        removed
    }

    /// RAII handle that runs [`Self::teardown_all`] when dropped. Keep it
    /// alive for the duration of `main`.
    #[must_use = "cleanup runs when the scope is dropped"]
    pub fn scope(self: &Arc<Self>) -> ExitScope {
        ExitScope {
            guard: Arc::clone(self),
        }
    }

    /// Spawn a task that tears down all registered locks and exits the process
    /// when an interrupt or terminate signal arrives.
    ///
    /// Must be called from within a tokio runtime, once per process.
    ///
    /// # Errors
    ///
    /// Returns error if the signal handlers cannot be installed.
    pub fn install_signal_handlers(self: &Arc<Self>) -> Result<JoinHandle<()>> {
        let guard = Arc::clone(self);

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            let mut sigint = signal(SignalKind::interrupt())
                .map_err(|e| crate::Error::io_error(format!("Failed to setup SIGINT: {e}")))?;
            let mut sigterm = signal(SignalKind::terminate())
                .map_err(|e| crate::Error::io_error(format!("Failed to setup SIGTERM: {e}")))?;

            Ok(tokio::spawn(async move {
                let code = tokio::select! {
                    _ = sigint.recv() => {
                        tracing::info!("Received SIGINT");
                        INTERRUPTED_EXIT_CODE
                    }
                    _ = sigterm.recv() => {
                        tracing::info!("Received SIGTERM");
                        TERMINATED_EXIT_CODE
                    }
                };
                let removed = guard.teardown_all();
                tracing::info!("Removed {removed} lock file(s) before exit");
                std::process::exit(code);
            }))
        }

        #[cfg(not(unix))]
        {
            Ok(tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    tracing::info!("Received Ctrl-C");
                    guard.teardown_all();
                    std::process::exit(INTERRUPTED_EXIT_CODE);
                }
            }))
        }
    }
}

enum Teardown {
    Removed,
    Missing,
    Busy,
    Foreign(Option<u32>),
}

/// Unlink `path` under its advisory lock if the record names `pid`.
fn remove_if_owned(path: &Path, pid: u32) -> std::io::Result<Teardown> {
    use std::io::Read;

    use fs2::FileExt;

    let file = match std::fs::OpenOptions::new().read(true).open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Teardown::Missing),
        Err(e) => return Err(e),
    };
    match FileExt::try_lock_exclusive(&file) {
        Ok(()) => {}
        Err(e) if is_contended(&e) => return Ok(Teardown::Busy),
        Err(e) => return Err(e),
    }

    let mut head = Vec::with_capacity(MAX_RECORD_BYTES);
    (&file).take(MAX_RECORD_BYTES as u64).read_to_end(&mut head)?;
    let owner = OwnershipRecord::parse(&head).map(|record| record.pid);
    if owner != Some(pid) {
        return Ok(Teardown::Foreign(owner));
    }

    match std::fs::remove_file(path) {
        Ok(()) => Ok(Teardown::Removed),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Teardown::Missing),
        Err(e) => Err(e),
    }
}

/// Tears down an [`ExitGuard`] on drop.
#[derive(Debug)]
pub struct ExitScope {
    guard: Arc<ExitGuard>,
}

impl Drop for ExitScope {
    fn drop(&mut self) {
        self.guard.teardown_all();
    }
}

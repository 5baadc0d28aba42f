//! Lock acquisition and release
//!
//! [`LockManager`] owns the process-local lock table and runs the acquisition
//! protocol:
//!
//! 1. resolve the lock path and serialize on it within this process;
//! 2. re-enter immediately if this process already holds it;
//! 3. take the advisory [`FileGuard`], read the [`OwnershipRecord`];
//! 4. keep waiting while a live owner with a matching command line holds it,
//!    otherwise (vacant, dead owner, reused pid, stale file) write our record;
//! 5. register the file for exit cleanup and hand back a [`LockHandle`].
//!
//! The advisory lock is only held around step 3-4. The logical lock lives in
//! the file contents.

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard, OnceLock, PoisonError,
    },
    time::{Duration, SystemTime},
};

use serde::Serialize;
use strum::Display;
use tokio::{sync::OnceCell, time::Instant};

use crate::{
    config::Config,
    exit_guard::ExitGuard,
    filelock::FileGuard,
    liveness::{current_command_line, LivenessFailurePolicy, ProcessLiveness, ProcfsLiveness},
    path::{resolve, LockTarget},
    record::{OwnershipRecord, MAX_RECORD_BYTES},
    Error, ErrorKind, Result,
};

/// Per-call acquisition options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LockOptions {
    /// How long to keep retrying under contention. `None` waits forever,
    /// zero fails on the first contended attempt.
    pub wait: Option<Duration>,
    /// Reclaim a live owner's lock once the file is older than this.
    pub stale: Option<Duration>,
}

impl LockOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the wait budget
    #[must_use]
    pub const fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = Some(wait);
        self
    }

    /// Set the stale threshold
    #[must_use]
    pub const fn with_stale(mut self, stale: Duration) -> Self {
        self.stale = Some(stale);
        self
    }
}

/// Where an acquisition attempt currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum AcquireState {
    Idle,
    Resolving,
    AwaitingGuard,
    VerifyingOwnership,
    WritingRecord,
    Held,
    Waiting,
    Succeeded,
    Failed(ErrorKind),
}

/// Why an existing record may be overwritten.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Claim {
    Vacant,
    OwnerDead(OwnershipRecord),
    PidReused(OwnershipRecord),
    Stale(OwnershipRecord, Duration),
    OwnerUnknown(OwnershipRecord),
}

enum Verdict {
    Claim(Claim),
    Contended(OwnershipRecord),
}

/// Read-only view of a lock file, see [`LockManager::inspect`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum LockStatus {
    /// No lock file, or no valid record in it.
    Free,
    /// Held by a live process whose command line matches the record.
    Held {
        record: OwnershipRecord,
        age_ms: Option<u64>,
    },
    /// The recorded owner is gone (or its pid was reused).
    Abandoned { record: OwnershipRecord },
    /// The recorded owner's liveness could not be determined.
    Unknown {
        record: OwnershipRecord,
        reason: String,
    },
}

/// A resolved lock path and its status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockReport {
    pub path: PathBuf,
    /// Whether this process holds the lock.
    pub held_here: bool,
    #[serde(flatten)]
    pub status: LockStatus,
}

/// Release capability returned by [`LockManager::lock`].
#[derive(Debug)]
#[must_use = "the lock stays held until released"]
pub struct LockHandle {
    manager: LockManager,
    path: PathBuf,
}

impl LockHandle {
    /// Resolved path of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release this hold (one level of recursion).
    ///
    /// # Errors
    ///
    /// See [`LockManager::unlock`].
    pub async fn release(self) -> Result<()> {
        self.manager.unlock(&self.path).await
    }
}

/// Per-path entry in the lock table.
#[derive(Debug, Default)]
struct PathSlot {
    /// Held while this process acquires or releases the path.
    gate: tokio::sync::Mutex<()>,
    /// Recursion depth; non-zero iff this process holds the lock. Only
    /// written under `gate`, readable without it.
    depth: AtomicUsize,
}

impl PathSlot {
    fn depth(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }

    fn set_depth(&self, depth: usize) {
        self.depth.store(depth, Ordering::Release);
    }
}

#[derive(Debug)]
struct Inner {
    liveness: Arc<dyn ProcessLiveness>,
    exit_guard: Arc<ExitGuard>,
    backoff: Duration,
    lock_file_name: String,
    liveness_failure: LivenessFailurePolicy,
    pid: u32,
    own_command_line: OnceCell<String>,
    table: Mutex<HashMap<PathBuf, Arc<PathSlot>>>,
}

/// Process-local lock table plus the acquisition protocol. Cheap to clone.
#[derive(Debug, Clone)]
pub struct LockManager {
    inner: Arc<Inner>,
}

static GLOBAL: OnceLock<LockManager> = OnceLock::new();

impl LockManager {
    pub fn new(
        config: &Config,
        liveness: Arc<dyn ProcessLiveness>,
        exit_guard: Arc<ExitGuard>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                liveness,
                exit_guard,
                backoff: config.backoff(),
                lock_file_name: config.lock_file_name.clone(),
                liveness_failure: config.liveness_failure,
                pid: std::process::id(),
                own_command_line: OnceCell::new(),
                table: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Manager with `config`, procfs liveness and the global exit guard.
    pub fn from_config(config: &Config) -> Self {
        Self::new(config, Arc::new(ProcfsLiveness::new()), ExitGuard::global())
    }

    /// The process-wide manager. Built from default config unless
    /// [`Self::install_global`] ran first.
    pub fn global() -> &'static Self {
        GLOBAL.get_or_init(|| Self::from_config(&Config::default()))
    }

    /// Configure the process-wide manager. Returns `false` if it was already
    /// initialized, in which case `config` is ignored.
    pub fn install_global(config: &Config) -> bool {
        GLOBAL.set(Self::from_config(config)).is_ok()
    }

    /// The exit guard lock files are registered with.
    pub fn exit_guard(&self) -> &Arc<ExitGuard> {
        &self.inner.exit_guard
    }

    /// Acquire the logical lock on `path`.
    ///
    /// Re-entrant: if this process already holds the lock the recursion depth
    /// is bumped without touching the filesystem. The wait budget also covers
    /// time spent behind other tasks of this process acquiring the same path.
    ///
    /// # Errors
    ///
    /// - [`Error::PathResolution`] if the path cannot be resolved
    /// - [`Error::TimedOut`] if the wait budget runs out under contention
    /// - [`Error::OsLock`] if the lock file cannot be opened, locked or read
    /// - [`Error::Write`] if the ownership record cannot be written
    pub async fn lock(&self, path: impl AsRef<Path>, options: LockOptions) -> Result<LockHandle> {
        let requested = path.as_ref();
        let started = Instant::now();
        let resolved = self.resolve(requested).await?.resolved;

        let result = self
            .lock_resolved(requested, &resolved, options, started)
            .await;
        if result.is_err() {
            self.prune(&resolved);
        }
        result.map(|()| self.handle(resolved))
    }

    async fn lock_resolved(
        &self,
        requested: &Path,
        resolved: &Path,
        options: LockOptions,
        started: Instant,
    ) -> Result<()> {
        let deadline = options.wait.map(|wait| started + wait);
        let slot = self.slot(resolved);

        let _gate = match deadline {
            None => slot.gate.lock().await,
            Some(deadline) => tokio::time::timeout_at(deadline, slot.gate.lock())
                .await
                .map_err(|_| {
                    tracing::debug!(
                        "Gave up on {} while another task of this process was acquiring it",
                        resolved.display()
                    );
                    Error::TimedOut {
                        path: resolved.to_path_buf(),
                        waited: started.elapsed(),
                    }
                })?,
        };

        let depth = slot.depth();
        if depth > 0 {
            slot.set_depth(depth + 1);
            tracing::debug!(
                "Re-entered lock {} (depth {})",
                resolved.display(),
                depth + 1
            );
            return Ok(());
        }

        self.acquire(requested, resolved, options.stale, started, deadline)
            .await?;
        slot.set_depth(1);
        self.inner.exit_guard.register(resolved);
        tracing::debug!("Acquired lock {}", resolved.display());
        Ok(())
    }

    /// Release one hold on `path`. The lock file is removed when the last
    /// recursive hold is released.
    ///
    /// # Errors
    ///
    /// - [`Error::PathResolution`] if the path cannot be resolved
    /// - [`Error::NotHeld`] if this process does not hold the lock
    /// - [`Error::OwnershipMismatch`] if the file names another owner; it is
    ///   left untouched and this process no longer considers the lock held
    /// - [`Error::OsLock`] / [`Error::Io`] if the file cannot be locked or
    ///   removed; the hold is kept so the unlock can be retried
    pub async fn unlock(&self, path: impl AsRef<Path>) -> Result<()> {
        let resolved = self.resolve(path.as_ref()).await?.resolved;
        let result = self.unlock_resolved(&resolved).await;
        self.prune(&resolved);
        result
    }

    async fn unlock_resolved(&self, resolved: &Path) -> Result<()> {
        let not_held = || Error::NotHeld {
            path: resolved.to_path_buf(),
        };

        let slot = self.existing_slot(resolved).ok_or_else(not_held)?;
        // An unheld path may have an acquisition in flight; don't queue behind it.
        if slot.depth() == 0 {
            return Err(not_held());
        }

        let _gate = slot.gate.lock().await;
        let depth = slot.depth();
        if depth == 0 {
            return Err(not_held());
        }
        if depth > 1 {
            slot.set_depth(depth - 1);
            tracing::debug!(
                "Released one level of lock {} (depth {})",
                resolved.display(),
                depth - 1
            );
            return Ok(());
        }

        match self.remove_lock_file(resolved).await {
            Ok(()) => {
                slot.set_depth(0);
                self.inner.exit_guard.unregister(resolved);
                tracing::debug!("Released lock {}", resolved.display());
                Ok(())
            }
            Err(e @ Error::OwnershipMismatch { .. }) => {
                slot.set_depth(0);
                self.inner.exit_guard.unregister(resolved);
                tracing::warn!("{e}");
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Whether this process currently holds the lock on `path`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PathResolution`] if the path cannot be resolved.
    pub async fn is_held(&self, path: impl AsRef<Path>) -> Result<bool> {
        let resolved = self.resolve(path.as_ref()).await?.resolved;
        Ok(self.depth(&resolved) > 0)
    }

    /// Resolved paths of every lock this process holds.
    pub fn held_paths(&self) -> Vec<PathBuf> {
        let mut held: Vec<PathBuf> = self
            .table()
            .iter()
            .filter(|(_, slot)| slot.depth() > 0)
            .map(|(path, _)| path.clone())
            .collect();
        held.sort();
        held
    }

    /// Report who holds `path` without taking the advisory lock or writing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PathResolution`] if the path cannot be resolved, or
    /// [`Error::Io`] if an existing lock file cannot be read.
    pub async fn inspect(&self, path: impl AsRef<Path>) -> Result<LockReport> {
        let target = self.resolve(path.as_ref()).await?;
        let held_here = self.depth(&target.resolved) > 0;
        let status = self.status_of(&target).await?;
        Ok(LockReport {
            path: target.resolved,
            held_here,
            status,
        })
    }

    async fn status_of(&self, target: &LockTarget) -> Result<LockStatus> {
        if !target.exists() {
            return Ok(LockStatus::Free);
        }

        let head = read_head(&target.resolved).await?;
        let Some(record) = OwnershipRecord::parse(&head) else {
            return Ok(LockStatus::Free);
        };

        Ok(match self.inner.liveness.query(record.pid).await {
            Ok(status) if status.alive && record.matches_command_line(&status.command_line) => {
                let age_ms = target
                    .age(SystemTime::now())
                    .map(|age| u64::try_from(age.as_millis()).unwrap_or(u64::MAX));
                LockStatus::Held { record, age_ms }
            }
            Ok(_) => LockStatus::Abandoned { record },
            Err(e) => LockStatus::Unknown {
                record,
                reason: e.to_string(),
            },
        })
    }

    async fn resolve(&self, requested: &Path) -> Result<LockTarget> {
        resolve(requested, &self.inner.lock_file_name).await
    }

    /// Retry loop: guard, verify, write; or wait and go again.
    async fn acquire(
        &self,
        requested: &Path,
        resolved: &Path,
        stale: Option<Duration>,
        started: Instant,
        deadline: Option<Instant>,
    ) -> Result<()> {
        let mut state = AcquireState::Idle;
        let mut first_attempt = true;

        loop {
            enter(&mut state, AcquireState::Resolving, resolved);
            if !first_attempt {
                // Surfaces a lock directory that disappeared while waiting.
                self.resolve(requested)
                    .await
                    .inspect_err(|e| enter(&mut state, AcquireState::Failed(e.kind()), resolved))?;
            }
            first_attempt = false;

            enter(&mut state, AcquireState::AwaitingGuard, resolved);
            let guard = FileGuard::try_acquire(resolved)
                .await
                .inspect_err(|e| enter(&mut state, AcquireState::Failed(e.kind()), resolved))?;

            if let Some(mut guard) = guard {
                enter(&mut state, AcquireState::VerifyingOwnership, resolved);
                let verdict = self
                    .verify(&mut guard, stale)
                    .await
                    .inspect_err(|e| enter(&mut state, AcquireState::Failed(e.kind()), resolved))?;

                match verdict {
                    Verdict::Claim(claim) => {
                        enter(&mut state, AcquireState::WritingRecord, resolved);
                        log_claim(resolved, &claim);
                        let record = OwnershipRecord::new(self.inner.pid, self.own_command_line().await);
                        guard
                            .write_record(&record)
                            .await
                            .inspect_err(|e| enter(&mut state, AcquireState::Failed(e.kind()), resolved))?;
                        guard.release();
                        enter(&mut state, AcquireState::Held, resolved);
                        enter(&mut state, AcquireState::Succeeded, resolved);
                        return Ok(());
                    }
                    Verdict::Contended(owner) => {
                        guard.release();
                        tracing::debug!(
                            "Lock {} is held by pid {} ({})",
                            resolved.display(),
                            owner.pid,
                            owner.command_line
                        );
                    }
                }
            }

            let now = Instant::now();
            let pause = match deadline {
                None => self.inner.backoff,
                Some(deadline) if now >= deadline => {
                    let err = Error::TimedOut {
                        path: resolved.to_path_buf(),
                        waited: now - started,
                    };
                    enter(&mut state, AcquireState::Failed(err.kind()), resolved);
                    return Err(err);
                }
                Some(deadline) => self.inner.backoff.min(deadline - now),
            };

            enter(&mut state, AcquireState::Waiting, resolved);
            tracing::debug!(
                "Lock {} is busy, retrying in {}ms",
                resolved.display(),
                pause.as_millis()
            );
            tokio::time::sleep(pause).await;
        }
    }

    /// Decide whether the record under `guard` may be overwritten.
    async fn verify(&self, guard: &mut FileGuard, stale: Option<Duration>) -> Result<Verdict> {
        let Some(record) = guard.read_record()? else {
            return Ok(Verdict::Claim(Claim::Vacant));
        };

        match self.inner.liveness.query(record.pid).await {
            Ok(status) if !status.alive => return Ok(Verdict::Claim(Claim::OwnerDead(record))),
            Ok(status) if !record.matches_command_line(&status.command_line) => {
                return Ok(Verdict::Claim(Claim::PidReused(record)));
            }
            Ok(_) => {}
            Err(e) => match self.inner.liveness_failure {
                LivenessFailurePolicy::AssumeAlive => {
                    tracing::warn!(
                        "Cannot determine whether pid {} is alive, assuming it is: {e}",
                        record.pid
                    );
                }
                LivenessFailurePolicy::AssumeDead => {
                    tracing::warn!(
                        "Cannot determine whether pid {} is alive, assuming it is not: {e}",
                        record.pid
                    );
                    return Ok(Verdict::Claim(Claim::OwnerUnknown(record)));
                }
            },
        }

        if let Some(threshold) = stale {
            let age = guard
                .modified()
                .map(|modified| SystemTime::now().duration_since(modified).unwrap_or(Duration::ZERO));
            if let Some(age) = age.filter(|age| *age > threshold) {
                return Ok(Verdict::Claim(Claim::Stale(record, age)));
            }
        }

        Ok(Verdict::Contended(record))
    }

    /// Verify ownership under the advisory lock and unlink the lock file.
    async fn remove_lock_file(&self, resolved: &Path) -> Result<()> {
        loop {
            if let Some(mut guard) = FileGuard::try_acquire(resolved).await? {
                if let Some(record) = guard.read_record()? {
                    if record.pid != self.inner.pid {
                        return Err(Error::OwnershipMismatch {
                            path: resolved.to_path_buf(),
                            owner: record.pid,
                            current: self.inner.pid,
                        });
                    }
                }
                guard.remove_file().await?;
                guard.release();
                return Ok(());
            }
            tracing::debug!(
                "Lock file {} is being inspected by another process, retrying unlock",
                resolved.display()
            );
            tokio::time::sleep(self.inner.backoff).await;
        }
    }

    async fn own_command_line(&self) -> &str {
        self.inner
            .own_command_line
            .get_or_init(|| current_command_line(self.inner.liveness.as_ref()))
            .await
    }

    fn handle(&self, path: PathBuf) -> LockHandle {
        LockHandle {
            manager: self.clone(),
            path,
        }
    }

    fn table(&self) -> MutexGuard<'_, HashMap<PathBuf, Arc<PathSlot>>> {
        self.inner
            .table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn slot(&self, resolved: &Path) -> Arc<PathSlot> {
        Arc::clone(self.table().entry(resolved.to_path_buf()).or_default())
    }

    fn existing_slot(&self, resolved: &Path) -> Option<Arc<PathSlot>> {
        self.table().get(resolved).map(Arc::clone)
    }

    fn depth(&self, resolved: &Path) -> usize {
        self.existing_slot(resolved).map_or(0, |slot| slot.depth())
    }

    /// Drop the table entry for `resolved` if nothing holds or awaits it.
    fn prune(&self, resolved: &Path) {
        let mut table = self.table();
        let unused = table.get(resolved).is_some_and(|slot| {
            Arc::strong_count(slot) == 1 && slot.depth() == 0 && slot.gate.try_lock().is_ok()
        });
        if unused {
            table.remove(resolved);
        }
    }
}

fn enter(state: &mut AcquireState, next: AcquireState, path: &Path) {
    tracing::trace!("{}: {} -> {}", path.display(), state, next);
    *state = next;
}

fn log_claim(path: &Path, claim: &Claim) {
    match claim {
        Claim::Vacant => {}
        Claim::OwnerDead(owner) => tracing::info!(
            "Reclaiming {} from dead pid {}",
            path.display(),
            owner.pid
        ),
        Claim::PidReused(owner) => tracing::info!(
            "Reclaiming {}: pid {} now runs a different command than '{}'",
            path.display(),
            owner.pid,
            owner.command_line
        ),
        Claim::Stale(owner, age) => tracing::warn!(
            "Force-reclaiming stale lock {} from live pid {} (age {}ms)",
            path.display(),
            owner.pid,
            age.as_millis()
        ),
        Claim::OwnerUnknown(owner) => tracing::warn!(
            "Reclaiming {} from pid {} with unknown status",
            path.display(),
            owner.pid
        ),
    }
}

async fn read_head(path: &Path) -> Result<Vec<u8>> {
    use tokio::io::AsyncReadExt;

    let read = async {
        let file = tokio::fs::File::open(path).await?;
        let mut head = Vec::with_capacity(MAX_RECORD_BYTES);
        file.take(MAX_RECORD_BYTES as u64).read_to_end(&mut head).await?;
        Ok::<_, std::io::Error>(head)
    };

    match read.await {
        Ok(head) => Ok(head),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(Error::io_error(format!(
            "Failed to read lock file '{}': {e}",
            path.display()
        ))),
    }
}

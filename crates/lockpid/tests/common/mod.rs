//! Common helpers for driving the `lockpid` binary in integration tests
//!
//! Every harness gets its own temporary directory used as working directory
//! and config home, so no global or project config leaks into a test.

#![allow(dead_code)]

use std::{
    path::{Path, PathBuf},
    process::{Child, Command as StdCommand, ExitStatus, Stdio},
    time::{Duration, Instant},
};

use tempfile::TempDir;

/// Retry interval used by every spawned `lockpid`.
pub const TEST_BACKOFF_MS: &str = "50";

/// A pid no process can have (far above any `pid_max`).
pub const UNUSED_PID: u32 = 2_147_483_600;

pub struct LockHarness {
    _temp_dir: TempDir,
    /// Canonical scratch directory
    pub root: PathBuf,
    pub bin: PathBuf,
}

impl LockHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("temp dir");
        let root = std::fs::canonicalize(temp_dir.path()).expect("canonical temp dir");
        Self {
            _temp_dir: temp_dir,
            root,
            bin: PathBuf::from(env!("CARGO_BIN_EXE_lockpid")),
        }
    }

    /// Path inside the scratch directory.
    pub fn path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// `lockpid` command with an isolated environment.
    pub fn cmd(&self) -> assert_cmd::Command {
        let mut cmd = assert_cmd::Command::new(&self.bin);
        self.isolate_assert(&mut cmd);
        cmd
    }

    /// Start `lockpid hold <path>` in the background and wait until it owns
    /// the lock file.
    pub fn spawn_holder(&self, lock: &Path, extra: &[&str]) -> Child {
        let mut cmd = StdCommand::new(&self.bin);
        self.isolate_std(&mut cmd);
        let child = cmd
            .arg("hold")
            .arg(lock)
            .args(extra)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn holder");

        let owner = child.id();
        wait_until(Duration::from_secs(10), || recorded_pid(lock) == Some(owner));
        child
    }

    fn isolate_std(&self, cmd: &mut StdCommand) {
        cmd.current_dir(&self.root)
            .env("HOME", &self.root)
            .env("XDG_CONFIG_HOME", self.root.join(".config"))
            .env("LOCKPID_BACKOFF_MS", TEST_BACKOFF_MS)
            .env_remove("LOCKPID_WAIT_MS")
            .env_remove("LOCKPID_STALE_MS")
            .env_remove("LOCKPID_LOCK_FILE_NAME")
            .env_remove("LOCKPID_LIVENESS_FAILURE")
            .env_remove("RUST_LOG");
    }

    fn isolate_assert(&self, cmd: &mut assert_cmd::Command) {
        cmd.current_dir(&self.root)
            .env("HOME", &self.root)
            .env("XDG_CONFIG_HOME", self.root.join(".config"))
            .env("LOCKPID_BACKOFF_MS", TEST_BACKOFF_MS)
            .env_remove("LOCKPID_WAIT_MS")
            .env_remove("LOCKPID_STALE_MS")
            .env_remove("LOCKPID_LOCK_FILE_NAME")
            .env_remove("LOCKPID_LIVENESS_FAILURE")
            .env_remove("RUST_LOG");
    }
}

/// Pid recorded in the lock file at `path`, if any.
pub fn recorded_pid(path: &Path) -> Option<u32> {
    std::fs::read_to_string(path)
        .ok()?
        .lines()
        .next()?
        .trim()
        .parse()
        .ok()
}

/// Poll `condition` until it holds; panics after `timeout`.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) {
    let started = Instant::now();
    while !condition() {
        assert!(started.elapsed() < timeout, "condition not met within {timeout:?}");
        std::thread::sleep(Duration::from_millis(20));
    }
}

/// Send `signal` (e.g. `"INT"`) to `child` and wait for it to exit.
pub fn signal_and_wait(child: &mut Child, signal: &str) -> ExitStatus {
    let status = StdCommand::new("kill")
        .arg(format!("-{signal}"))
        .arg(child.id().to_string())
        .status()
        .expect("run kill");
    assert!(status.success(), "kill -{signal} failed");
    child.wait().expect("wait for holder")
}

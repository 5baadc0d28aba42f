mod hold;
mod run;
mod status;

use std::time::Duration;

use anyhow::Result;
use clap::ArgMatches;
use lockpid_core::{Config, LockManager, LockOptions};

/// What every handler needs besides its own arguments.
#[derive(Debug, Clone)]
pub struct Context {
    pub manager: LockManager,
    pub config: Config,
}

impl Context {
    /// Lock options from config, overridden by `--wait` / `--stale`.
    fn lock_options(&self, matches: &ArgMatches) -> LockOptions {
        let defaults = self.config.lock_options();
        LockOptions {
            wait: millis(matches, "wait").or(defaults.wait),
            stale: millis(matches, "stale").or(defaults.stale),
        }
    }
}

fn millis(matches: &ArgMatches, id: &str) -> Option<Duration> {
    matches.get_one::<u64>(id).copied().map(Duration::from_millis)
}

/// Run the selected subcommand. Returns the process exit code.
pub async fn dispatch(matches: &ArgMatches, ctx: &Context) -> Result<i32> {
    match matches.subcommand() {
        Some(("hold", sub_m)) => hold::handle(sub_m, ctx).await,
        Some(("run", sub_m)) => run::handle(sub_m, ctx).await,
        Some(("status", sub_m)) => status::handle(sub_m, ctx).await,
        _ => anyhow::bail!("Unknown command. Run 'lockpid --help' for usage."),
    }
}

/// Exit code for a failed command: the lock error's code if there is one in
/// the chain, otherwise a generic system error.
pub fn get_exit_code(err: &anyhow::Error) -> i32 {
    lock_error(err).map_or(2, lockpid_core::Error::exit_code)
}

/// `error[KIND]: message` for lock errors, `error: message` otherwise.
pub fn format_error(err: &anyhow::Error) -> String {
    match lock_error(err) {
        Some(lock_err) => format!("error[{}]: {err:#}", lock_err.kind()),
        None => format!("error: {err:#}"),
    }
}

fn lock_error(err: &anyhow::Error) -> Option<&lockpid_core::Error> {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<lockpid_core::Error>())
}

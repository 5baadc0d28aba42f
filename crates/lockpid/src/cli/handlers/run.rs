use std::{path::PathBuf, process::ExitStatus};

use anyhow::{Context as _, Result};
use clap::ArgMatches;

use super::Context;

pub async fn handle(matches: &ArgMatches, ctx: &Context) -> Result<i32> {
    let Some(path) = matches.get_one::<PathBuf>("path") else {
        anyhow::bail!("Missing lock path");
    };
    let command: Vec<&String> = matches
        .get_many::<String>("command")
        .map(Iterator::collect)
        .unwrap_or_default();
    let Some((program, args)) = command.split_first() else {
        anyhow::bail!("Missing command to run");
    };

    let handle = ctx
        .manager
        .lock(path, ctx.lock_options(matches))
        .await
        .with_context(|| format!("Couldn't lock {}", path.display()))?;
    tracing::info!("Running {program} under {}", handle.path().display());

    let status = tokio::process::Command::new(program)
        .args(args)
        .status()
        .await
        .with_context(|| format!("Failed to run '{program}'"));

    // Release even when the command could not be started.
    let released = handle.path().to_path_buf();
    handle
        .release()
        .await
        .with_context(|| format!("Couldn't unlock {}", released.display()))?;

    Ok(exit_code_of(status?))
}

#[cfg(unix)]
fn exit_code_of(status: ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;

    status
        .code()
        .or_else(|| status.signal().map(|signal| 128 + signal))
        .unwrap_or(1)
}

#[cfg(not(unix))]
fn exit_code_of(status: ExitStatus) -> i32 {
    status.code().unwrap_or(1)
}

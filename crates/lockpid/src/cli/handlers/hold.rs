use std::{path::PathBuf, time::Duration};

use anyhow::{Context as _, Result};
use clap::ArgMatches;

use super::{millis, Context};

const TICK: Duration = Duration::from_secs(1);

pub async fn handle(matches: &ArgMatches, ctx: &Context) -> Result<i32> {
    let Some(path) = matches.get_one::<PathBuf>("path") else {
        anyhow::bail!("Missing lock path");
    };
    let options = ctx.lock_options(matches);

    let handle = ctx
        .manager
        .lock(path, options)
        .await
        .with_context(|| format!("Couldn't lock {}", path.display()))?;
    println!("Locked {} (pid {})", handle.path().display(), std::process::id());

    match millis(matches, "hold-ms") {
        Some(hold) => count_down(hold).await,
        // Released by the exit guard when a signal arrives.
        None => std::future::pending::<()>().await,
    }

    let released = handle.path().to_path_buf();
    handle
        .release()
        .await
        .with_context(|| format!("Couldn't unlock {}", released.display()))?;
    println!("Released {}", released.display());
    Ok(0)
}

/// Sleep for `hold`, printing the whole seconds left once per second.
async fn count_down(hold: Duration) {
    let mut remaining = hold;
    while !remaining.is_zero() {
        // Fractional part first so the printed counts land on whole seconds.
        let partial = Duration::new(0, remaining.subsec_nanos());
        let step = if partial.is_zero() { TICK } else { partial };
        tokio::time::sleep(step).await;
        remaining -= step;
        if !remaining.is_zero() {
            println!("{}", remaining.as_secs());
        }
    }
}

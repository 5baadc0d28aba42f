//! lockpid CLI
//!
//! Binary name: `lockpid`

use std::{path::PathBuf, process};

use anyhow::{Context as _, Result};
use clap::ArgMatches;
use lockpid::cli::{
    build_cli,
    handlers::{dispatch, format_error, get_exit_code, Context},
};
use lockpid_core::{config, LockManager};

#[tokio::main]
async fn main() {
    let matches = build_cli().get_matches();
    init_tracing(matches.get_count("verbose"));

    let code = match run(&matches).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("{}", format_error(&err));
            get_exit_code(&err)
        }
    };

    // `run` has returned, so the exit scope already removed any lock files.
    process::exit(code);
}

async fn run(matches: &ArgMatches) -> Result<i32> {
    let config = match matches.get_one::<PathBuf>("config") {
        Some(path) => config::load_config_from(path),
        None => config::load_config(),
    }
    .context("Failed to load configuration")?;

    if !LockManager::install_global(&config) {
        tracing::debug!("Global lock manager was already initialized");
    }
    let manager = LockManager::global().clone();

    let exit_guard = manager.exit_guard();
    let _scope = exit_guard.scope();
    let _signals = exit_guard.install_signal_handlers()?;

    let ctx = Context { manager, config };
    dispatch(matches, &ctx).await
}

fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .with_writer(std::io::stderr)
        .init();
}

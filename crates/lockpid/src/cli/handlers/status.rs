use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::ArgMatches;
use lockpid_core::{LockReport, LockStatus};

use super::Context;

pub async fn handle(matches: &ArgMatches, ctx: &Context) -> Result<i32> {
    let Some(path) = matches.get_one::<PathBuf>("path") else {
        anyhow::bail!("Missing lock path");
    };

    let report = ctx
        .manager
        .inspect(path)
        .await
        .with_context(|| format!("Couldn't inspect {}", path.display()))?;

    if matches.get_flag("json") {
        let json = serde_json::to_string_pretty(&report)
            .context("Failed to serialize lock report")?;
        println!("{json}");
    } else {
        println!("{}", describe(&report));
    }
    Ok(0)
}

fn describe(report: &LockReport) -> String {
    let path = report.path.display();
    match &report.status {
        LockStatus::Free => format!("{path}: free"),
        LockStatus::Held { record, age_ms } => {
            let age = age_ms.map_or_else(String::new, |ms| format!(", age {ms}ms"));
            format!(
                "{path}: held by pid {} ({}){age}",
                record.pid, record.command_line
            )
        }
        LockStatus::Abandoned { record } => format!(
            "{path}: abandoned by pid {} ({})",
            record.pid, record.command_line
        ),
        LockStatus::Unknown { record, reason } => format!(
            "{path}: owner pid {} unknown: {reason}",
            record.pid
        ),
    }
}

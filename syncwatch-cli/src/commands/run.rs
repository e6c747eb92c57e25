//! `syncwatch run` and `syncwatch once`.

use anyhow::{bail, Context, Result};
use colored::Colorize;

use syncwatch_core::{config, Settings};
use syncwatch_daemon::{run_once_blocking, start_blocking};
use syncwatch_sync::{Action, CycleReport};

pub fn run(settings: Settings) -> Result<()> {
    let connections =
        config::load_connections(&settings).context("failed to load monitored connections")?;
    start_blocking(settings, connections).context("orchestrator exited with error")
}

pub fn once(settings: Settings) -> Result<()> {
    let connections =
        config::load_connections(&settings).context("failed to load monitored connections")?;
    let report = run_once_blocking(settings, connections).context("orchestration cycle failed")?;
    print_report(&report);

    if !report.failed.is_empty() {
        bail!("{} connection(s) failed", report.failed.len());
    }
    Ok(())
}

fn print_report(report: &CycleReport) {
    for processed in &report.processed {
        let outcome = match &processed.action {
            Action::Triggered(job) => format!("triggered job {job}").green().to_string(),
            Action::Waiting(job) => format!("job {job} still running").yellow().to_string(),
            Action::StatusUnavailable(job) => {
                format!("status of job {job} unavailable").yellow().to_string()
            }
            Action::TriggerFailed(err) => format!("trigger failed: {err}").red().to_string(),
            Action::NoChanges => "no changes".to_string(),
            Action::NoTables => "no monitored tables".bright_black().to_string(),
        };
        match processed.resolved {
            Some(state) => println!("{}: previous job {state}; {outcome}", processed.connection_id),
            None => println!("{}: {outcome}", processed.connection_id),
        }
    }
    for failed in &report.failed {
        println!("{}: {}", failed.connection_id, failed.error.red());
    }
    println!(
        "{} processed, {} failed in {}ms",
        report.processed.len(),
        report.failed.len(),
        (report.finished_at - report.started_at).num_milliseconds(),
    );
}

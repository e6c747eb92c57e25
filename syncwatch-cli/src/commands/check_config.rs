//! `syncwatch check-config` — resolve and validate everything `run` needs.

use anyhow::{Context, Result};
use colored::Colorize;

use syncwatch_core::{config, Settings};
use syncwatch_daemon::TickSchedule;

pub fn run(settings: &Settings) -> Result<()> {
    let schedule = TickSchedule::parse(&settings.schedule).context("invalid schedule")?;
    let host = settings
        .source_db
        .require_host()
        .context("source database is not configured")?;
    let connections =
        config::load_connections(settings).context("failed to load monitored connections")?;

    println!("{}", "configuration ok".green().bold());
    println!("  schedule:         {}", schedule.expr());
    println!(
        "  source database:  {}:{}/{}",
        host,
        settings.source_db.port,
        settings.source_db.database.as_deref().unwrap_or("-"),
    );
    println!("  job api:          {}", settings.job_api.base_url);
    println!("  state dir:        {}", settings.state_dir.display());
    println!("  connections file: {}", settings.connections_file.display());
    println!("  connections:      {}", connections.len());
    for connection in &connections {
        println!(
            "    {} ({} tables)",
            connection.label(),
            connection.monitored_tables.len()
        );
        for table in &connection.monitored_tables {
            println!(
                "      {} by {}",
                table.qualified_name(),
                table.updated_at_column
            );
        }
    }
    Ok(())
}

//! syncwatch — change-driven sync orchestrator.
//!
//! # Usage
//!
//! ```text
//! syncwatch run
//! syncwatch once
//! syncwatch status [--json]
//! syncwatch check-config
//! ```
//!
//! All settings come from the environment (`SOURCE_DB_*`, `SYNC_API_URL`,
//! `SYNCWATCH_*`); see `syncwatch check-config` for the resolved values.

mod commands;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use commands::status::StatusArgs;
use syncwatch_core::Settings;

#[derive(Parser, Debug)]
#[command(
    name = "syncwatch",
    version,
    about = "Trigger downstream syncs when monitored tables change",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the scheduler until SIGINT/SIGTERM.
    Run,

    /// Run a single orchestration cycle and exit.
    Once,

    /// Show watermarks and active jobs per connection.
    Status(StatusArgs),

    /// Validate settings, schedule and the connections file.
    CheckConfig,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::from_env().context("failed to read settings from environment")?;
    syncwatch_daemon::init_tracing(&settings.log_level);

    match cli.command {
        Commands::Run => commands::run::run(settings),
        Commands::Once => commands::run::once(settings),
        Commands::Status(args) => args.run(&settings),
        Commands::CheckConfig => commands::check_config::run(&settings),
    }
}

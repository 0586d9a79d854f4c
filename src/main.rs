//! Pulse - job scheduling and execution engine.
//!
//! Main entry point for the Pulse CLI and scheduler.

mod cli;
mod cmd_job;
mod server;

use clap::Parser;

use pulse_config::ConfigLoader;

use cli::{Cli, Commands};
use cmd_job::handle_job_command;
use server::{init_tracing, run_scheduler, validate_config};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = ConfigLoader::load_or_default(&cli.config)?;
    init_tracing(&config.logging)?;
    validate_config(&config)?;

    match cli.command {
        None | Some(Commands::Run) => run_scheduler(config).await,
        Some(Commands::Job { action }) => handle_job_command(action, &config).await,
    }
}

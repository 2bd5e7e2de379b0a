use anyhow::Result;
use clap::{Parser, Subcommand};
use log::info;

use rosetta_op::{Supervisor, SupervisorError};
use rosetta_op_runtime::OsSignals;
use rosetta_op_types::Configuration;

#[derive(Parser)]
#[command(name = "rosetta-op")]
#[command(about = "Rosetta API implementation for Optimism")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run rosetta-op
    Run,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match cli.command {
        Command::Run => run().await?,
    }

    Ok(())
}

async fn run() -> Result<(), SupervisorError> {
    let config = Configuration::from_env()?;
    info!(
        "Starting rosetta-op on {} in {:?} mode",
        config.network, config.mode
    );

    let signals = OsSignals::new().map_err(SupervisorError::Signals)?;
    Supervisor::new(config, signals).run().await?;

    info!("rosetta-op stopped");
    Ok(())
}

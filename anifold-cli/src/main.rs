//! Anifold CLI - Command-line interface
//!
//! Runs the API server and offers one-shot access to source health,
//! verification and search.

mod commands;

use anifold_core::AnifoldConfig;
use anifold_core::tracing_setup::{CliLogLevel, init_tracing};
use anyhow::Context;
use clap::Parser;

#[derive(Parser)]
#[command(name = "anifold")]
#[command(about = "Anime source aggregation and streaming proxy")]
#[command(version)]
struct Cli {
    /// Console log level, overridden by RUST_LOG
    #[arg(long, value_enum, default_value_t = CliLogLevel::Info, global = true)]
    log_level: CliLogLevel,

    #[command(subcommand)]
    command: commands::Commands,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AnifoldConfig::from_env();

    init_tracing(cli.log_level.into(), &config.logging)
        .context("Failed to initialize logging")?;

    commands::handle_command(cli.command, config).await
}

//! Berth CLI
//!
//! Command-line interface for interacting with the berth daemon.

mod api;
mod commands;
mod config;
mod id_resolver;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, handle_command};
use config::Config;

#[derive(Parser)]
#[command(name = "berth")]
#[command(about = "Berth job orchestration CLI", long_about = None)]
struct Cli {
    /// Daemon URL
    #[arg(long, env = "BERTH_URL", default_value = "http://localhost:8080")]
    daemon_url: String,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config {
        daemon_url: cli.daemon_url,
    };

    handle_command(cli.command, &config).await
}

//! Switchboard command-line interface.

pub mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use switchboard_core::config::LogLevel;

/// Switchboard - assistant gateway
#[derive(Parser)]
#[command(name = "switchboard")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Increase logging verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Path to config file
    #[arg(short, long, env = "SWITCHBOARD_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand)]
pub enum Commands {
    /// Start the gateway server or check its status
    Gateway(commands::gateway::GatewayArgs),

    /// Configuration management
    Config(commands::config::ConfigArgs),

    /// Show version information
    Version,
}

/// Default `EnvFilter` directive for a configured level and `-v` count.
pub fn log_directive(level: LogLevel, verbose: u8) -> String {
    let level = match verbose {
        0 => level.as_str(),
        1 => "debug",
        _ => "trace",
    };
    format!("switchboard={}", level)
}

/// Run the CLI with the given arguments.
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = cli.config.as_deref();
    match cli.command {
        Commands::Gateway(args) => commands::gateway::run(args, config).await,
        Commands::Config(args) => commands::config::run(args, config).await,
        Commands::Version => {
            println!(
                "switchboard {} (protocol {})",
                env!("CARGO_PKG_VERSION"),
                switchboard_gateway::protocol::PROTOCOL_VERSION
            );
            Ok(())
        }
    }
}

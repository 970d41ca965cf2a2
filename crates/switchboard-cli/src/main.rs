//! Switchboard CLI entry point.

use clap::Parser;
use switchboard_cli::{log_directive, run, Cli};
use switchboard_core::Config;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Pick up the configured level; a broken config is reported by the command itself
    let level = Config::load_or_default(cli.config.as_deref())
        .map(|c| c.logging.level)
        .unwrap_or_default();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_directive(level, cli.verbose).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Run the command
    run(cli).await
}

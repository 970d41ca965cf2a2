//! Gateway command.

use clap::Args;
use std::net::TcpStream;
use std::path::Path;
use std::time::Duration;
use switchboard_core::config::{BindMode, Config};
use switchboard_core::paths;
use switchboard_gateway::Gateway;
use tracing::info;

/// Gateway command arguments.
#[derive(Args)]
pub struct GatewayArgs {
    #[command(subcommand)]
    pub command: GatewayCommand,
}

#[derive(clap::Subcommand)]
pub enum GatewayCommand {
    /// Start the gateway server
    Run {
        /// Bind mode (loopback, lan)
        #[arg(short, long)]
        bind: Option<String>,

        /// Port number
        #[arg(short, long)]
        port: Option<u16>,

        /// Token clients must present when connecting
        #[arg(long, env = "SWITCHBOARD_AUTH_TOKEN")]
        auth_token: Option<String>,
    },

    /// Show gateway status
    Status,
}

/// Apply command-line overrides on top of the loaded configuration.
pub fn apply_overrides(
    config: &mut Config,
    bind: Option<&str>,
    port: Option<u16>,
    auth_token: Option<String>,
) -> anyhow::Result<()> {
    if let Some(bind) = bind {
        config.gateway.bind = bind.parse::<BindMode>().map_err(anyhow::Error::msg)?;
    }
    if let Some(port) = port {
        config.gateway.port = port;
    }
    if auth_token.is_some() {
        config.gateway.auth_token = auth_token;
    }
    if config.skills.state_dir.is_none() {
        config.skills.state_dir = Some(paths::skills_dir()?);
    }
    Ok(())
}

/// Run the gateway command.
pub async fn run(args: GatewayArgs, explicit: Option<&Path>) -> anyhow::Result<()> {
    let mut config = Config::load_or_default(explicit)?;

    match args.command {
        GatewayCommand::Run {
            bind,
            port,
            auth_token,
        } => {
            apply_overrides(&mut config, bind.as_deref(), port, auth_token)?;

            info!(
                "Starting gateway on port {} ({:?} bind)",
                config.gateway.port, config.gateway.bind
            );

            let gateway = Gateway::new(config)?;
            info!("Registered {} methods", gateway.methods().len());
            gateway.run().await?;
        }

        GatewayCommand::Status => {
            let port = config.gateway.port;
            let addr = std::net::SocketAddr::from(([127, 0, 0, 1], port));

            match TcpStream::connect_timeout(&addr, Duration::from_secs(1)) {
                Ok(_) => println!("Gateway is running on port {}", port),
                Err(_) => println!("Gateway is not running."),
            }
        }
    }

    Ok(())
}

//! Configuration management commands.

use clap::Args;
use serde_json::Value;
use std::path::{Path, PathBuf};
use switchboard_core::config::Config;
use switchboard_core::paths;

/// Config command arguments.
#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(clap::Subcommand)]
pub enum ConfigCommand {
    /// Show configuration
    Show,

    /// Get a configuration value
    Get {
        /// Configuration key (dot-separated path)
        key: String,
    },

    /// Set a configuration value
    Set {
        /// Configuration key
        key: String,

        /// Value to set
        value: String,
    },

    /// Initialize configuration
    Init {
        /// Force overwrite existing config
        #[arg(short, long)]
        force: bool,
    },

    /// Show configuration file path
    Path,

    /// Validate configuration
    Validate,
}

/// Resolve the config file path from `--config` or the default location.
pub fn config_path(explicit: Option<&Path>) -> anyhow::Result<PathBuf> {
    match explicit {
        Some(path) => Ok(path.to_path_buf()),
        None => Ok(paths::config_file()?),
    }
}

/// Look up a dot-separated key in a JSON document.
pub fn get_path<'a>(json: &'a Value, key: &str) -> Option<&'a Value> {
    key.split('.').try_fold(json, |acc, k| acc.get(k))
}

/// Set a dot-separated key, creating intermediate objects as needed.
///
/// `raw` is parsed as JSON first so numbers and booleans keep their type;
/// anything that is not valid JSON is stored as a string.
pub fn set_path(json: &mut Value, key: &str, raw: &str) {
    let parsed: Value =
        serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));

    let parts: Vec<&str> = key.split('.').collect();
    let mut current = json;
    for (i, part) in parts.iter().enumerate() {
        if i == parts.len() - 1 {
            current[part] = parsed;
            return;
        }
        if !current.get(part).map_or(false, Value::is_object) {
            current[part] = serde_json::json!({});
        }
        current = &mut current[part];
    }
}

/// Run the config command.
pub async fn run(args: ConfigArgs, explicit: Option<&Path>) -> anyhow::Result<()> {
    match args.command {
        ConfigCommand::Show => {
            let config = Config::load_or_default(explicit)?;
            println!("{}", config.to_json5()?);
        }

        ConfigCommand::Get { key } => {
            let config = Config::load_or_default(explicit)?;
            let json = serde_json::to_value(&config)?;

            match get_path(&json, &key) {
                Some(v) => println!("{}", serde_json::to_string_pretty(v)?),
                None => anyhow::bail!("Key not found: {}", key),
            }
        }

        ConfigCommand::Set { key, value } => {
            let path = config_path(explicit)?;
            let config = if path.exists() {
                Config::load(&path)?
            } else {
                Config::default()
            };
            let mut json = serde_json::to_value(&config)?;
            set_path(&mut json, &key, &value);

            // Deserialize back to Config to validate the shape is still correct
            let updated: Config = serde_json::from_value(json)
                .map_err(|e| anyhow::anyhow!("Invalid configuration after set: {}", e))?;
            updated.validate()?;
            updated.save(&path)?;

            println!("Set {} = {}", key, value);
        }

        ConfigCommand::Init { force } => {
            let path = config_path(explicit)?;

            if path.exists() && !force {
                anyhow::bail!(
                    "Config file already exists: {:?}. Use --force to overwrite.",
                    path
                );
            }

            if explicit.is_none() {
                paths::ensure_dirs()?;
            }

            Config::default().save(&path)?;
            println!("Created config file: {:?}", path);
        }

        ConfigCommand::Path => {
            let path = config_path(explicit)?;
            println!("{}", path.display());
        }

        ConfigCommand::Validate => {
            let path = config_path(explicit)?;
            match Config::load(&path) {
                Ok(config) => match config.validate() {
                    Ok(_) => println!("Configuration is valid"),
                    Err(e) => anyhow::bail!("Configuration error: {}", e),
                },
                Err(e) => anyhow::bail!("Failed to load config: {}", e),
            }
        }
    }

    Ok(())
}

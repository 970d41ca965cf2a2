//! CLI routing tests.
//!
//! These parse and run commands in-process through the `switchboard_cli`
//! library, so they do not depend on a prebuilt binary.

use clap::{CommandFactory, Parser};
use switchboard_cli::commands::config::ConfigCommand;
use switchboard_cli::commands::gateway::GatewayCommand;
use switchboard_cli::{run, Cli, Commands};
use switchboard_core::Config;
use tempfile::TempDir;

#[test]
fn test_cli_help_lists_commands() {
    let help = Cli::command().render_help().to_string();
    assert!(help.contains("gateway"), "help should mention gateway: {}", help);
    assert!(help.contains("config"), "help should mention config: {}", help);
    assert!(help.contains("version"), "help should mention version: {}", help);
}

#[test]
fn test_cli_command_definition_is_consistent() {
    Cli::command().debug_assert();
}

#[test]
fn test_cli_unknown_command() {
    assert!(Cli::try_parse_from(["switchboard", "nonexistent-command"]).is_err());
}

#[test]
fn test_cli_gateway_status_parses() {
    let cli = Cli::try_parse_from(["switchboard", "gateway", "status"]).unwrap();
    match cli.command {
        Commands::Gateway(args) => assert!(matches!(args.command, GatewayCommand::Status)),
        _ => panic!("Expected Gateway command"),
    }
}

#[test]
fn test_cli_rejects_bad_port() {
    assert!(Cli::try_parse_from(["switchboard", "gateway", "run", "--port", "99999"]).is_err());
}

#[tokio::test]
async fn test_cli_version_runs() {
    let cli = Cli::try_parse_from(["switchboard", "version"]).unwrap();
    run(cli).await.unwrap();
}

#[tokio::test]
async fn test_cli_config_init_uses_explicit_path() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("switchboard.json5");
    let path_arg = path.to_string_lossy().to_string();

    let cli = Cli::try_parse_from(["switchboard", "--config", &path_arg, "config", "init"]).unwrap();
    match &cli.command {
        Commands::Config(args) => assert!(matches!(args.command, ConfigCommand::Init { force: false })),
        _ => panic!("Expected Config command"),
    }
    run(cli).await.unwrap();

    let loaded = Config::load(&path).unwrap();
    assert_eq!(loaded.gateway.port, Config::default().gateway.port);
}

#[tokio::test]
async fn test_cli_config_get_missing_key_fails() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("switchboard.json5");
    Config::default().save(&path).unwrap();
    let path_arg = path.to_string_lossy().to_string();

    let cli = Cli::try_parse_from([
        "switchboard",
        "--config",
        &path_arg,
        "config",
        "get",
        "gateway.nope",
    ])
    .unwrap();

    assert!(run(cli).await.is_err());
}

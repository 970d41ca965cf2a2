//! Config save/load roundtrip integration tests.

use std::path::Path;
use switchboard_core::config::{BindMode, Config, LogLevel, LogStyle, SkillEntryConfig};
use tempfile::TempDir;

#[test]
fn test_config_save_and_load() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.json5");

    let config = Config::default();
    config.save(&path).unwrap();

    let loaded = Config::load(&path).unwrap();
    assert_eq!(loaded.gateway.port, config.gateway.port);
    assert_eq!(loaded.gateway.bind, config.gateway.bind);
    assert_eq!(
        loaded.logging.diagnostics.slow_message_ms,
        config.logging.diagnostics.slow_message_ms
    );
    assert_eq!(loaded.tools, config.tools);
}

#[test]
fn test_config_modify_and_reload() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.json5");

    let mut config = Config::default();
    config.gateway.port = 9090;
    config.gateway.bind = BindMode::Lan;
    config.gateway.auth_token = Some("token".to_string());
    config.logging.level = LogLevel::Debug;
    config.logging.diagnostics.style = LogStyle::Full;
    config.tools.deny = vec!["group:runtime".to_string()];
    config.skills.entries.insert(
        "weather".to_string(),
        SkillEntryConfig {
            enabled: false,
            ..Default::default()
        },
    );
    config.save(&path).unwrap();

    let loaded = Config::load(&path).unwrap();
    assert_eq!(loaded.gateway.port, 9090);
    assert_eq!(loaded.gateway.bind, BindMode::Lan);
    assert_eq!(loaded.gateway.auth_token.as_deref(), Some("token"));
    assert_eq!(loaded.logging.level, LogLevel::Debug);
    assert_eq!(loaded.logging.diagnostics.style, LogStyle::Full);
    assert_eq!(loaded.tools.deny, vec!["group:runtime".to_string()]);
    assert!(!loaded.skills.entries["weather"].enabled);
    assert!(loaded.validate().is_ok());
}

#[test]
fn test_config_json5_comments_and_trailing_commas() {
    let config = Config::parse(
        r#"{
            // local development
            gateway: { port: 19000, },
            tools: { allow: ["fs_*"], deny: ["fs_delete"], },
        }"#,
    )
    .unwrap();

    assert_eq!(config.gateway.port, 19000);
    let policy = config.tools.compile();
    assert!(policy.is_allowed("fs_read"));
    assert!(!policy.is_allowed("fs_delete"));
    assert!(!policy.is_allowed("bash"));
}

#[test]
fn test_config_load_nonexistent() {
    let result = Config::load(Path::new("/nonexistent/config.json5"));
    assert!(result.is_err());
}

#[test]
fn test_config_parse_invalid() {
    let result = Config::parse("not valid json");
    assert!(result.is_err());
}

//! Configuration schema definitions.

use crate::policy::ToolPolicyConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

/// Main Switchboard configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Gateway settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Default tool policy applied to every connection.
    #[serde(default = "ToolPolicyConfig::allow_all")]
    pub tools: ToolPolicyConfig,

    /// Skill settings.
    #[serde(default)]
    pub skills: SkillsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            gateway: GatewayConfig::default(),
            logging: LoggingConfig::default(),
            tools: ToolPolicyConfig::allow_all(),
            skills: SkillsConfig::default(),
        }
    }
}

/// Gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Bind mode.
    #[serde(default)]
    pub bind: BindMode,

    /// Port number.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Shared token clients must present in `connect`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,

    /// Maximum concurrent connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Maximum inbound messages per second per connection.
    #[serde(default = "default_max_messages_per_second")]
    pub max_messages_per_second: u64,

    /// Time a client has to complete the handshake before it is dropped.
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,

    /// Interval between `tick` events sent to connected clients.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: BindMode::default(),
            port: default_port(),
            auth_token: None,
            max_connections: default_max_connections(),
            max_messages_per_second: default_max_messages_per_second(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            tick_interval_ms: default_tick_interval_ms(),
        }
    }
}

fn default_port() -> u16 {
    18789
}

fn default_max_connections() -> usize {
    100
}

fn default_max_messages_per_second() -> u64 {
    60
}

fn default_handshake_timeout_ms() -> u64 {
    10_000
}

fn default_tick_interval_ms() -> u64 {
    30_000
}

/// Bind mode for the gateway.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BindMode {
    /// Bind to loopback only (127.0.0.1).
    #[default]
    Loopback,

    /// Bind to all interfaces.
    Lan,
}

impl std::str::FromStr for BindMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "loopback" => Ok(Self::Loopback),
            "lan" => Ok(Self::Lan),
            other => Err(format!("Invalid bind mode: {} (expected loopback or lan)", other)),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level.
    #[serde(default)]
    pub level: LogLevel,

    /// Transport diagnostics settings.
    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,
}

/// Log level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    /// Directive string understood by `tracing_subscriber::EnvFilter`.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }
}

/// Per-message transport logging style.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStyle {
    /// `full` when debug logging is enabled, `compact` otherwise.
    #[default]
    Auto,

    /// Log every message.
    Full,

    /// Log only failed and slow messages.
    Compact,
}

impl LogStyle {
    /// Get the style as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Full => "full",
            Self::Compact => "compact",
        }
    }
}

impl std::str::FromStr for LogStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "full" => Ok(Self::Full),
            "compact" => Ok(Self::Compact),
            _ => Err(format!("Unknown log style: {}", s)),
        }
    }
}

/// Transport diagnostics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticsConfig {
    /// Logging style.
    #[serde(default)]
    pub style: LogStyle,

    /// Messages taking longer than this are flagged as slow.
    #[serde(default = "default_slow_message_ms")]
    pub slow_message_ms: u64,

    /// Hard limit on how long a handler may take to respond.
    #[serde(default = "default_response_timeout_ms")]
    pub response_timeout_ms: u64,
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            style: LogStyle::default(),
            slow_message_ms: default_slow_message_ms(),
            response_timeout_ms: default_response_timeout_ms(),
        }
    }
}

fn default_slow_message_ms() -> u64 {
    50
}

fn default_response_timeout_ms() -> u64 {
    30_000
}

/// Skills configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SkillsConfig {
    /// Directory where per-skill state files are written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<PathBuf>,

    /// Known skills keyed by skill key.
    #[serde(default)]
    pub entries: HashMap<String, SkillEntryConfig>,
}

/// Settings for one skill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillEntryConfig {
    /// Whether the skill is enabled.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// API key handed to the skill.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Extra environment for the skill.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
}

impl Default for SkillEntryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key: None,
            env: HashMap::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

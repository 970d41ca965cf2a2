//! Configuration loading and persistence.

use super::{BindMode, Config};
use crate::env;
use crate::error::ConfigError;
use crate::paths;
use std::fs;
use std::path::Path;

impl Config {
    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self, ConfigError> {
        let path = paths::config_file()?;
        Self::load(&path)
    }

    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from a string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        json5::from_str(content).map_err(|e| ConfigError::Json5(e.to_string()))
    }

    /// Load from `path` (or the default path), falling back to defaults when
    /// no file exists. Environment overrides are applied either way.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        let loaded = match path {
            Some(path) => Self::load(path),
            None => Self::load_default(),
        };

        let mut config = match loaded {
            Ok(config) => config,
            Err(ConfigError::NotFound(path)) => {
                tracing::debug!("No config file at {}, using defaults", path.display());
                Self::default()
            }
            Err(e) => return Err(e),
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply `SWITCHBOARD_PORT` and `SWITCHBOARD_AUTH_TOKEN` overrides.
    pub fn apply_env_overrides(&mut self) {
        if let Some(port) = env::get_u16(env::vars::PORT) {
            self.gateway.port = port;
        }
        if let Some(token) = env::get_var(env::vars::AUTH_TOKEN) {
            self.gateway.auth_token = Some(token);
        }
    }

    /// Save configuration to a file path.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = self.to_json5()?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Write atomically
        let temp_path = path.with_extension("tmp");
        fs::write(&temp_path, &content)?;
        fs::rename(&temp_path, path)?;

        Ok(())
    }

    /// Serialize to JSON5 string.
    pub fn to_json5(&self) -> Result<String, ConfigError> {
        // json5 has no serializer; plain JSON is valid JSON5
        serde_json::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Validate the configuration, collecting all errors before returning.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        // 1. Gateway limits
        if self.gateway.port == 0 {
            errors.push("Gateway port cannot be 0".to_string());
        }
        if self.gateway.max_connections == 0 {
            errors.push("Gateway max_connections must be greater than 0".to_string());
        }
        if self.gateway.max_messages_per_second == 0 {
            errors.push("Gateway max_messages_per_second must be greater than 0".to_string());
        }
        if self.gateway.handshake_timeout_ms == 0 {
            errors.push("Gateway handshake_timeout_ms must be greater than 0".to_string());
        }
        if self.gateway.tick_interval_ms == 0 {
            errors.push("Gateway tick_interval_ms must be greater than 0".to_string());
        }

        // 2. Non-loopback binds must be protected by a token
        if self.gateway.bind != BindMode::Loopback
            && self.gateway.auth_token.as_deref().map_or(true, str::is_empty)
        {
            errors.push("Gateway auth_token is required when bind is not loopback".to_string());
        }

        // 3. Diagnostics thresholds
        let diagnostics = &self.logging.diagnostics;
        if diagnostics.slow_message_ms == 0 {
            errors.push("Diagnostics slow_message_ms must be greater than 0".to_string());
        }
        if diagnostics.response_timeout_ms < diagnostics.slow_message_ms {
            errors.push(format!(
                "Diagnostics response_timeout_ms ({}) must not be below slow_message_ms ({})",
                diagnostics.response_timeout_ms, diagnostics.slow_message_ms
            ));
        }

        // 4. Tool patterns must not be blank
        for (list, patterns) in [("allow", &self.tools.allow), ("deny", &self.tools.deny)] {
            for (i, pattern) in patterns.iter().enumerate() {
                if pattern.trim().is_empty() {
                    errors.push(format!("Tool {} pattern [{}] is empty", list, i));
                }
            }
        }

        // 5. Skill keys must be usable as file names
        for key in self.skills.entries.keys() {
            if !is_valid_skill_key(key) {
                errors.push(format!("Invalid skill key '{}'", key));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors.join("; ")))
        }
    }
}

/// Check that a skill key is non-empty and contains only
/// alphanumerics, `-`, `_` and `.` (but is not `.` or `..`).
pub fn is_valid_skill_key(key: &str) -> bool {
    !key.is_empty()
        && key != "."
        && key != ".."
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

//! # switchboard-core
//!
//! Core configuration and utilities shared by the Switchboard crates:
//!
//! - **Configuration**: Loading, validation, and persistence of the JSON5 config file
//! - **Policy**: Allow/deny evaluation of tool names against wildcard patterns
//! - **Utilities**: Path resolution and environment handling

pub mod config;
pub mod env;
pub mod error;
pub mod paths;
pub mod policy;

// Re-exports for convenience
pub use config::Config;
pub use error::ConfigError;
pub use policy::{is_tool_allowed, ToolPattern, ToolPolicy, ToolPolicyConfig};

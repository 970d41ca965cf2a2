//! Environment variable handling.

use std::env;

/// Well-known environment variable names.
pub mod vars {
    /// Gateway port override.
    pub const PORT: &str = "SWITCHBOARD_PORT";

    /// Gateway auth token override.
    pub const AUTH_TOKEN: &str = "SWITCHBOARD_AUTH_TOKEN";

    /// Base directory override (defaults to ~/.switchboard).
    pub const HOME: &str = "SWITCHBOARD_HOME";
}

/// Get an environment variable, returning None if not set or empty.
pub fn get_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

/// Get an environment variable as a u16 (e.g., for ports).
pub fn get_u16(name: &str) -> Option<u16> {
    get_var(name).and_then(|v| v.parse().ok())
}

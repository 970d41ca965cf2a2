//! Shared helpers for the Switchboard integration tests.

use serde_json::{json, Value};
use switchboard_core::Config;

/// Text of a `connect` request frame speaking protocol 1.
pub fn connect_frame(id: &str) -> String {
    request_frame(
        id,
        "connect",
        json!({
            "min_protocol": 1,
            "max_protocol": 1,
            "client": { "id": "integration", "version": "0.0.0" }
        }),
    )
}

/// Text of a request frame.
pub fn request_frame(id: &str, method: &str, params: Value) -> String {
    json!({ "id": id, "method": method, "params": params }).to_string()
}

/// Loopback config with skill state kept under `state_dir`.
pub fn test_config(state_dir: &std::path::Path) -> Config {
    let mut config = Config::default();
    config.skills.state_dir = Some(state_dir.to_path_buf());
    config
}

//! Connection state and the registry of live connections.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tokio::sync::RwLock;

/// Handshake state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Waiting for `connect`.
    Uninitialized,

    /// Handshake complete.
    Connected,

    /// Transport gone. Terminal.
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Uninitialized => "uninitialized",
            Self::Connected => "connected",
            Self::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Client identity presented during the handshake.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientInfo {
    /// Client identifier (e.g. "cli", "control-ui").
    pub id: String,

    /// Client version.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Client platform.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
}

/// One client connection.
#[derive(Debug, Clone)]
pub struct Connection {
    id: String,
    state: ConnectionState,
    protocol: Option<u32>,
    client: Option<ClientInfo>,
    created_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}

impl Connection {
    /// Create a connection with a fresh id.
    pub fn new() -> Self {
        Self::with_id(uuid::Uuid::new_v4().to_string())
    }

    /// Create a connection with the given id.
    pub fn with_id(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            state: ConnectionState::Uninitialized,
            protocol: None,
            client: None,
            created_at: now,
            last_activity: now,
        }
    }

    /// Connection id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current handshake state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Negotiated protocol version (set by the handshake).
    pub fn protocol(&self) -> Option<u32> {
        self.protocol
    }

    /// Client info (set by the handshake).
    pub fn client(&self) -> Option<&ClientInfo> {
        self.client.as_ref()
    }

    /// Last inbound activity.
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_activity
    }

    /// Update last activity time.
    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }

    /// Move from `uninitialized` to `connected`.
    ///
    /// Returns false (and changes nothing) from any other state.
    pub fn mark_connected(&mut self, protocol: u32, client: Option<ClientInfo>) -> bool {
        if self.state != ConnectionState::Uninitialized {
            return false;
        }
        self.state = ConnectionState::Connected;
        self.protocol = Some(protocol);
        self.client = client;
        true
    }

    /// Move to `closed`.
    pub fn close(&mut self) {
        self.state = ConnectionState::Closed;
    }

    /// Snapshot for the connection registry.
    pub fn summary(&self) -> ConnectionSummary {
        ConnectionSummary {
            id: self.id.clone(),
            state: self.state,
            protocol: self.protocol,
            client: self.client.clone(),
            connected_at: self.created_at,
            last_activity: self.last_activity,
        }
    }
}

/// Serializable view of a connection.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionSummary {
    pub id: String,
    pub state: ConnectionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub protocol: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client: Option<ClientInfo>,
    pub connected_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

/// Live connections, keyed by id.
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<String, ConnectionSummary>>,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    /// Create a new connection registry.
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Insert or replace a connection snapshot.
    pub async fn upsert(&self, summary: ConnectionSummary) {
        let mut connections = self.connections.write().await;
        connections.insert(summary.id.clone(), summary);
    }

    /// Remove a connection.
    pub async fn remove(&self, id: &str) {
        let mut connections = self.connections.write().await;
        connections.remove(id);
    }

    /// Get a connection by id.
    pub async fn get(&self, id: &str) -> Option<ConnectionSummary> {
        let connections = self.connections.read().await;
        connections.get(id).cloned()
    }

    /// Connections that completed the handshake, oldest first.
    pub async fn connected(&self) -> Vec<ConnectionSummary> {
        let connections = self.connections.read().await;
        let mut list: Vec<_> = connections
            .values()
            .filter(|c| c.state == ConnectionState::Connected)
            .cloned()
            .collect();
        list.sort_by_key(|c| c.connected_at);
        list
    }

    /// Total connection count, handshake or not.
    pub async fn count(&self) -> usize {
        let connections = self.connections.read().await;
        connections.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_connection_is_uninitialized() {
        let conn = Connection::with_id("c1");
        assert_eq!(conn.id(), "c1");
        assert_eq!(conn.state(), ConnectionState::Uninitialized);
        assert!(conn.protocol().is_none());
        assert!(conn.client().is_none());
    }

    #[test]
    fn test_mark_connected_only_once() {
        let mut conn = Connection::new();
        let client = ClientInfo {
            id: "cli".into(),
            ..Default::default()
        };
        assert!(conn.mark_connected(1, Some(client.clone())));
        assert_eq!(conn.state(), ConnectionState::Connected);
        assert_eq!(conn.protocol(), Some(1));
        assert_eq!(conn.client(), Some(&client));

        assert!(!conn.mark_connected(2, None));
        assert_eq!(conn.protocol(), Some(1));
    }

    #[test]
    fn test_closed_is_terminal() {
        let mut conn = Connection::new();
        conn.close();
        assert!(!conn.mark_connected(1, None));
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[test]
    fn test_touch_updates_last_activity() {
        let mut conn = Connection::new();
        let before = conn.last_activity();
        std::thread::sleep(std::time::Duration::from_millis(5));
        conn.touch();
        assert!(conn.last_activity() >= before);
    }

    #[tokio::test]
    async fn test_registry_tracks_connected_only() {
        let registry = ConnectionRegistry::new();
        let pending = Connection::with_id("pending");
        let mut ready = Connection::with_id("ready");
        ready.mark_connected(1, None);

        registry.upsert(pending.summary()).await;
        registry.upsert(ready.summary()).await;
        assert_eq!(registry.count().await, 2);

        let connected = registry.connected().await;
        assert_eq!(connected.len(), 1);
        assert_eq!(connected[0].id, "ready");

        registry.remove("ready").await;
        assert!(registry.get("ready").await.is_none());
        assert_eq!(registry.count().await, 1);
    }
}

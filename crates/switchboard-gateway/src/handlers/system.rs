//! System RPC method handlers.

use super::HandlerContext;
use crate::methods::{MethodHandler, MethodRegistry, RequestContext, Responder};
use crate::Result;
use async_trait::async_trait;
use serde_json::json;
use std::sync::{Arc, Weak};

/// Ping method.
pub struct PingHandler;

#[async_trait]
impl MethodHandler for PingHandler {
    async fn handle(&self, _ctx: RequestContext, respond: Responder) -> Result<()> {
        respond.ok(json!({
            "pong": true,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }));
        Ok(())
    }
}

/// System info method.
pub struct SystemInfoHandler;

#[async_trait]
impl MethodHandler for SystemInfoHandler {
    async fn handle(&self, _ctx: RequestContext, respond: Responder) -> Result<()> {
        let host = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "unknown".to_string());

        respond.ok(json!({
            "name": "switchboard-gateway",
            "version": env!("CARGO_PKG_VERSION"),
            "protocol": crate::protocol::PROTOCOL_VERSION,
            "platform": std::env::consts::OS,
            "arch": std::env::consts::ARCH,
            "hostname": host,
        }));
        Ok(())
    }
}

/// Lists registered methods.
pub struct SystemMethodsHandler {
    registry: Weak<MethodRegistry>,
}

impl SystemMethodsHandler {
    pub fn new(registry: Weak<MethodRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl MethodHandler for SystemMethodsHandler {
    async fn handle(&self, _ctx: RequestContext, respond: Responder) -> Result<()> {
        let methods = self
            .registry
            .upgrade()
            .map(|r| r.list())
            .unwrap_or_default();
        respond.ok(json!({
            "count": methods.len(),
            "methods": methods,
        }));
        Ok(())
    }
}

/// Lists connections that completed the handshake.
pub struct SystemPresenceHandler {
    context: Arc<HandlerContext>,
}

impl SystemPresenceHandler {
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }
}

#[async_trait]
impl MethodHandler for SystemPresenceHandler {
    async fn handle(&self, _ctx: RequestContext, respond: Responder) -> Result<()> {
        let connections = self.context.connections.connected().await;
        respond.ok(json!({
            "count": connections.len(),
            "connections": serde_json::to_value(&connections)?,
        }));
        Ok(())
    }
}

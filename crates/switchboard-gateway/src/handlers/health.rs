//! Health RPC method handler.

use super::HandlerContext;
use crate::diagnostics::DiagnosticsStats;
use crate::methods::{MethodHandler, RequestContext, Responder};
use crate::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Overall health status.
    pub status: String,

    /// Gateway version.
    pub version: String,

    /// Uptime in seconds.
    pub uptime_seconds: u64,

    /// Open connections, handshake or not.
    pub connections: usize,

    /// Transport counters.
    pub diagnostics: DiagnosticsStats,
}

/// Health method handler.
pub struct HealthHandler {
    context: Arc<HandlerContext>,
}

impl HealthHandler {
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }
}

#[async_trait]
impl MethodHandler for HealthHandler {
    async fn handle(&self, _ctx: RequestContext, respond: Responder) -> Result<()> {
        debug!("Health check request");

        let response = HealthResponse {
            status: "ok".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: self.context.started_at.elapsed().as_secs(),
            connections: self.context.connections.count().await,
            diagnostics: self.context.diagnostics.stats(),
        };

        respond.ok(serde_json::to_value(response)?);
        Ok(())
    }
}

//! The `connect` handshake handler.

use super::HandlerContext;
use crate::connection::ClientInfo;
use crate::methods::{MethodHandler, MethodRegistry, RequestContext, Responder};
use crate::protocol::{ErrorShape, PROTOCOL_VERSION};
use crate::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

/// Parameters for `connect`.
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectParams {
    /// Lowest protocol version the client speaks.
    pub min_protocol: u32,

    /// Highest protocol version the client speaks.
    pub max_protocol: u32,

    /// Client identity.
    pub client: ClientInfo,

    /// Credentials.
    #[serde(default)]
    pub auth: Option<ConnectAuth>,
}

/// Credentials presented during the handshake.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConnectAuth {
    #[serde(default)]
    pub token: Option<String>,
}

/// Compare two tokens without short-circuiting on the first mismatch.
pub fn tokens_equal(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut diff: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Negotiates the protocol version and checks credentials.
pub struct ConnectHandler {
    context: Arc<HandlerContext>,
    methods: Weak<MethodRegistry>,
}

impl ConnectHandler {
    pub fn new(context: Arc<HandlerContext>, methods: Weak<MethodRegistry>) -> Self {
        Self { context, methods }
    }
}

#[async_trait]
impl MethodHandler for ConnectHandler {
    async fn handle(&self, ctx: RequestContext, respond: Responder) -> Result<()> {
        let params: ConnectParams = ctx.params()?;
        debug!(
            conn_id = %ctx.conn_id,
            client = %params.client.id,
            min = params.min_protocol,
            max = params.max_protocol,
            "Connect request"
        );

        if params.min_protocol > PROTOCOL_VERSION || params.max_protocol < PROTOCOL_VERSION {
            respond.error(
                ErrorShape::invalid_request("protocol mismatch").with_details(json!({
                    "expected_protocol": PROTOCOL_VERSION,
                    "min_protocol": params.min_protocol,
                    "max_protocol": params.max_protocol,
                })),
            );
            return Ok(());
        }

        if let Some(expected) = self.context.config.gateway.auth_token.as_deref() {
            let provided = params.auth.as_ref().and_then(|a| a.token.as_deref());
            match provided {
                Some(token) if tokens_equal(token, expected) => {}
                Some(_) => {
                    warn!(conn_id = %ctx.conn_id, client = %params.client.id, "Rejected connect: invalid auth token");
                    respond.error(ErrorShape::unauthorized("invalid auth token"));
                    return Ok(());
                }
                None => {
                    respond.error(ErrorShape::unauthorized("auth token required"));
                    return Ok(());
                }
            }
        }

        let methods = self
            .methods
            .upgrade()
            .map(|registry| registry.list())
            .unwrap_or_default();

        respond.ok(json!({
            "protocol": PROTOCOL_VERSION,
            "conn_id": ctx.conn_id,
            "server": {
                "name": "switchboard",
                "version": env!("CARGO_PKG_VERSION"),
            },
            "features": {
                "methods": methods,
            },
            "policy": {
                "tick_interval_ms": self.context.config.gateway.tick_interval_ms,
            },
        }));
        Ok(())
    }
}

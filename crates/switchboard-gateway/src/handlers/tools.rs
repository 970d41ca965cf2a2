//! Tool policy RPC method handlers.

use super::HandlerContext;
use crate::error::GatewayError;
use crate::methods::{MethodHandler, RequestContext, Responder};
use crate::protocol::ErrorShape;
use crate::Result;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};

/// Backend that actually runs tools.
#[async_trait]
pub trait ToolExecutor: Send + Sync {
    /// Run `tool` with `args`.
    async fn execute(&self, tool: &str, args: Value) -> Result<Value>;
}

/// Parameters for tools.check.
#[derive(Debug, Deserialize)]
pub struct ToolsCheckParams {
    pub tool: String,
}

/// Parameters for tools.invoke.
#[derive(Debug, Deserialize)]
pub struct ToolsInvokeParams {
    pub tool: String,
    #[serde(default)]
    pub args: Option<Value>,
}

/// Reports whether the connection's policy allows a tool.
pub struct ToolsCheckHandler;

#[async_trait]
impl MethodHandler for ToolsCheckHandler {
    async fn handle(&self, ctx: RequestContext, respond: Responder) -> Result<()> {
        let params: ToolsCheckParams = ctx.params()?;
        let allowed = ctx.policy.is_allowed(&params.tool);
        debug!(tool = %params.tool, allowed, "Tool check");

        respond.ok(json!({
            "tool": params.tool,
            "allowed": allowed,
        }));
        Ok(())
    }
}

/// Runs a tool if the connection's policy allows it.
pub struct ToolsInvokeHandler {
    context: Arc<HandlerContext>,
}

impl ToolsInvokeHandler {
    pub fn new(context: Arc<HandlerContext>) -> Self {
        Self { context }
    }
}

#[async_trait]
impl MethodHandler for ToolsInvokeHandler {
    async fn handle(&self, ctx: RequestContext, respond: Responder) -> Result<()> {
        let params: ToolsInvokeParams = ctx.params()?;

        if !ctx.policy.is_allowed(&params.tool) {
            info!(conn_id = %ctx.conn_id, tool = %params.tool, "Tool denied by policy");
            respond.error(
                ErrorShape::unauthorized(format!("tool '{}' is not allowed", params.tool))
                    .with_details(json!({ "tool": params.tool })),
            );
            return Ok(());
        }

        let executor = self
            .context
            .tool_executor
            .as_ref()
            .ok_or_else(|| GatewayError::Unavailable("no tool executor configured".to_string()))?;

        let args = params.args.unwrap_or_else(|| json!({}));
        let result = executor.execute(&params.tool, args).await?;

        respond.ok(json!({
            "tool": params.tool,
            "result": result,
        }));
        Ok(())
    }
}

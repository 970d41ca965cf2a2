//! Built-in RPC method handlers.

pub mod connect;
pub mod health;
pub mod skills;
pub mod system;
pub mod tools;

use crate::connection::ConnectionRegistry;
use crate::diagnostics::TransportDiagnostics;
use crate::methods::{MethodRegistry, RegistryError};
use std::sync::Arc;
use std::time::Instant;
use switchboard_core::Config;

pub use connect::{tokens_equal, ConnectHandler, ConnectParams};
pub use health::HealthHandler;
pub use skills::{SkillPatch, SkillStatus, SkillStore, SkillsStatusHandler, SkillsUpdateHandler};
pub use system::{PingHandler, SystemInfoHandler, SystemMethodsHandler, SystemPresenceHandler};
pub use tools::{ToolExecutor, ToolsCheckHandler, ToolsInvokeHandler};

/// Shared context for handlers.
pub struct HandlerContext {
    /// Gateway configuration.
    pub config: Arc<Config>,

    /// When the gateway started.
    pub started_at: Instant,

    /// Live connections.
    pub connections: Arc<ConnectionRegistry>,

    /// Transport diagnostics.
    pub diagnostics: Arc<TransportDiagnostics>,

    /// Skill state.
    pub skills: Arc<SkillStore>,

    /// Tool execution backend, if any.
    pub tool_executor: Option<Arc<dyn ToolExecutor>>,
}

impl HandlerContext {
    /// Create a context from configuration.
    pub fn new(config: Arc<Config>) -> crate::Result<Self> {
        let skills = SkillStore::from_config(&config.skills)?;
        let diagnostics = TransportDiagnostics::new(&config.logging.diagnostics);
        Ok(Self {
            config,
            started_at: Instant::now(),
            connections: Arc::new(ConnectionRegistry::new()),
            diagnostics: Arc::new(diagnostics),
            skills: Arc::new(skills),
            tool_executor: None,
        })
    }

    /// Set the tool executor.
    pub fn with_tool_executor(mut self, executor: Arc<dyn ToolExecutor>) -> Self {
        self.tool_executor = Some(executor);
        self
    }
}

/// Register all built-in method handlers.
pub fn register_all(
    registry: &Arc<MethodRegistry>,
    context: HandlerContext,
) -> Result<(), RegistryError> {
    let ctx = Arc::new(context);
    let methods = Arc::downgrade(registry);

    // Handshake
    registry.register(
        "connect",
        Arc::new(ConnectHandler::new(ctx.clone(), methods.clone())),
    )?;

    // System methods
    registry.register("ping", Arc::new(PingHandler))?;
    registry.register("health", Arc::new(HealthHandler::new(ctx.clone())))?;
    registry.register("system.info", Arc::new(SystemInfoHandler))?;
    registry.register("system.methods", Arc::new(SystemMethodsHandler::new(methods)))?;
    registry.register(
        "system.presence",
        Arc::new(SystemPresenceHandler::new(ctx.clone())),
    )?;

    // Tool methods
    registry.register("tools.check", Arc::new(ToolsCheckHandler))?;
    registry.register("tools.invoke", Arc::new(ToolsInvokeHandler::new(ctx.clone())))?;

    // Skills methods
    registry.register(
        "skills.status",
        Arc::new(SkillsStatusHandler::new(ctx.clone())),
    )?;
    registry.register("skills.update", Arc::new(SkillsUpdateHandler::new(ctx)))?;

    Ok(())
}

//! WebSocket gateway and connection protocol for Switchboard.
//!
//! This crate provides:
//! - Request/response/event frames and the protocol error taxonomy
//! - A method registry with a one-shot responder contract
//! - Per-connection handshake enforcement and dispatch
//! - Per-key serialization of async work
//! - Transport diagnostics with slow-message detection
//! - The axum WebSocket server and built-in methods

pub mod connection;
pub mod diagnostics;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod methods;
pub mod protocol;
pub mod queue;
pub mod server;

pub use connection::{ClientInfo, Connection, ConnectionRegistry, ConnectionState};
pub use diagnostics::{MessageRecord, TransportDiagnostics};
pub use dispatcher::ConnectionDispatcher;
pub use error::GatewayError;
pub use handlers::{HandlerContext, ToolExecutor};
pub use methods::{handler_fn, MethodHandler, MethodRegistry, RegistryError, RequestContext, Responder};
pub use protocol::{error_shape, ErrorCode, ErrorShape, EventFrame, RequestFrame, ResponseFrame};
pub use queue::KeyedQueue;
pub use server::Gateway;

/// Result type for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;

//! Per-connection handshake enforcement and request dispatch.
//!
//! A connection starts `uninitialized`. Until a `connect` request succeeds
//! every other method is answered with `INVALID_REQUEST` without touching
//! the method registry. Once `connected`, requests are routed to the
//! registry. After `close` nothing more is dispatched or answered.
//!
//! Dispatch decisions happen in arrival order. Handlers other than
//! `connect` run on their own tasks, so responses may complete out of
//! order.

use crate::connection::{ClientInfo, Connection, ConnectionState};
use crate::diagnostics::{MessageTimer, TransportDiagnostics};
use crate::methods::{MethodRegistry, RequestContext, Responder, Reply};
use crate::protocol::{
    ErrorShape, RequestFrame, ResponseFrame, CONNECT_FIRST_MESSAGE, CONNECT_METHOD,
    PROTOCOL_VERSION,
};
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use switchboard_core::ToolPolicy;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Drives one connection's protocol state.
pub struct ConnectionDispatcher {
    connection: Arc<RwLock<Connection>>,
    registry: Arc<MethodRegistry>,
    diagnostics: Arc<TransportDiagnostics>,
    policy: Arc<ToolPolicy>,
    outbound: mpsc::UnboundedSender<ResponseFrame>,
    closed: CancellationToken,
    inflight: Arc<AtomicUsize>,
}

impl ConnectionDispatcher {
    /// Create a dispatcher for `connection`.
    ///
    /// Responses are delivered on the returned receiver.
    pub fn new(
        connection: Connection,
        registry: Arc<MethodRegistry>,
        diagnostics: Arc<TransportDiagnostics>,
        policy: Arc<ToolPolicy>,
    ) -> (Self, mpsc::UnboundedReceiver<ResponseFrame>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        let dispatcher = Self {
            connection: Arc::new(RwLock::new(connection)),
            registry,
            diagnostics,
            policy,
            outbound,
            closed: CancellationToken::new(),
            inflight: Arc::new(AtomicUsize::new(0)),
        };
        (dispatcher, rx)
    }

    /// Connection id.
    pub fn conn_id(&self) -> String {
        self.connection.read().id().to_string()
    }

    /// Snapshot of the connection.
    pub fn connection(&self) -> Connection {
        self.connection.read().clone()
    }

    /// Current handshake state.
    pub fn state(&self) -> ConnectionState {
        self.connection.read().state()
    }

    /// Whether the handshake has completed and the connection is open.
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Requests dispatched to handlers and not yet answered.
    pub fn inflight(&self) -> usize {
        self.inflight.load(Ordering::Acquire)
    }

    /// Handle one inbound text frame.
    pub async fn handle_text(&self, text: &str) {
        match RequestFrame::parse(text) {
            Ok(frame) => self.handle_request(frame).await,
            Err(response) => {
                if !self.is_closed() {
                    self.answer_unparsed(text, response);
                }
            }
        }
    }

    /// Answer a raw frame with `error` instead of dispatching it.
    ///
    /// The request id is recovered from the frame when it parses as JSON.
    pub fn reject_text(&self, text: &str, error: ErrorShape) {
        if self.is_closed() {
            return;
        }
        let id = serde_json::from_str::<Value>(text)
            .ok()
            .and_then(|v| v.get("id").cloned())
            .unwrap_or(Value::Null);
        self.answer_unparsed(text, ResponseFrame::failure(id, error));
    }

    /// Record and send a response to a frame that never reached dispatch.
    fn answer_unparsed(&self, text: &str, response: ResponseFrame) {
        let method = serde_json::from_str::<Value>(text)
            .ok()
            .and_then(|v| v.get("method").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_default();
        let timer = self.diagnostics.start(&self.conn_id(), &method);
        self.diagnostics.finish(timer, &response);
        self.send(response);
    }

    /// Handle one parsed request.
    pub async fn handle_request(&self, frame: RequestFrame) {
        let (state, conn_id) = {
            let mut conn = self.connection.write();
            conn.touch();
            (conn.state(), conn.id().to_string())
        };

        if state == ConnectionState::Closed || self.closed.is_cancelled() {
            debug!(conn_id = %conn_id, method = %frame.method, "Dropping request on closed connection");
            return;
        }

        let timer = self.diagnostics.start(&conn_id, &frame.method);
        let is_connect = frame.method == CONNECT_METHOD;

        match (state, is_connect) {
            (ConnectionState::Uninitialized, true) => self.handshake(frame, timer).await,
            (ConnectionState::Connected, false) => self.dispatch(frame, timer),
            _ => {
                let response =
                    ResponseFrame::failure(frame.id, ErrorShape::invalid_request(CONNECT_FIRST_MESSAGE));
                self.diagnostics.finish(timer, &response);
                self.send(response);
            }
        }
    }

    /// Close the connection. Pending waits are released without answers.
    pub fn close(&self) {
        let conn_id = {
            let mut conn = self.connection.write();
            conn.close();
            conn.id().to_string()
        };
        self.closed.cancel();
        debug!(conn_id = %conn_id, "Connection closed");
    }

    fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    fn send(&self, response: ResponseFrame) {
        if self.outbound.send(response).is_err() {
            debug!("Response receiver gone");
        }
    }

    fn context(&self, frame: &RequestFrame, conn_id: String) -> RequestContext {
        let client = self.connection.read().client().cloned();
        RequestContext {
            conn_id,
            request_id: frame.id.clone(),
            method: frame.method.clone(),
            params: frame.params.clone(),
            client,
            policy: Arc::clone(&self.policy),
        }
    }

    fn spawn_handler(&self, ctx: RequestContext) -> oneshot::Receiver<Reply> {
        let (respond, rx) = Responder::channel();
        tokio::spawn(self.registry.dispatch_in_order(ctx, respond));
        rx
    }

    /// Run `connect` inline so the next frame sees the new state.
    async fn handshake(&self, frame: RequestFrame, timer: MessageTimer) {
        let conn_id = self.conn_id();
        let ctx = self.context(&frame, conn_id.clone());
        let rx = self.spawn_handler(ctx);

        let Some(response) = settle(
            frame.id.clone(),
            rx,
            timer,
            &self.diagnostics,
            &self.closed,
        )
        .await
        else {
            return;
        };

        if response.success {
            let protocol = response
                .result
                .as_ref()
                .and_then(|r| r.get("protocol"))
                .and_then(Value::as_u64)
                .and_then(|p| u32::try_from(p).ok())
                .unwrap_or(PROTOCOL_VERSION);
            let client: Option<ClientInfo> = frame
                .params
                .as_ref()
                .and_then(|p| p.get("client"))
                .and_then(|c| serde_json::from_value(c.clone()).ok());

            let client_id = client.as_ref().map(|c| c.id.clone()).unwrap_or_default();
            if self.connection.write().mark_connected(protocol, client) {
                info!(conn_id = %conn_id, client = %client_id, protocol, "Handshake complete");
            }
        } else {
            debug!(conn_id = %conn_id, code = ?response.error_code(), "Handshake rejected");
        }

        self.send(response);
    }

    fn dispatch(&self, frame: RequestFrame, timer: MessageTimer) {
        let ctx = self.context(&frame, self.conn_id());
        let rx = self.spawn_handler(ctx);

        let diagnostics = Arc::clone(&self.diagnostics);
        let closed = self.closed.clone();
        let outbound = self.outbound.clone();
        let inflight = Arc::clone(&self.inflight);
        inflight.fetch_add(1, Ordering::AcqRel);

        tokio::spawn(async move {
            if let Some(response) = settle(frame.id, rx, timer, &diagnostics, &closed).await {
                let _ = outbound.send(response);
            }
            inflight.fetch_sub(1, Ordering::AcqRel);
        });
    }
}

impl Drop for ConnectionDispatcher {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}

/// Wait for a handler's reply, bounded by the response timeout.
///
/// Returns `None` if the connection closed first.
async fn settle(
    id: Value,
    rx: oneshot::Receiver<Reply>,
    timer: MessageTimer,
    diagnostics: &TransportDiagnostics,
    closed: &CancellationToken,
) -> Option<ResponseFrame> {
    let timeout = diagnostics.response_timeout();
    let outcome = tokio::select! {
        biased;
        _ = closed.cancelled() => None,
        result = tokio::time::timeout(timeout, rx) => Some(result),
    };

    let response = match outcome? {
        Ok(Ok(reply)) => reply.into_frame(id),
        Ok(Err(_)) => ResponseFrame::failure(
            id,
            ErrorShape::internal(format!(
                "handler for '{}' dropped the request without responding",
                timer.method()
            )),
        ),
        Err(_) => {
            diagnostics.record_timeout(&timer);
            ResponseFrame::failure(
                id,
                ErrorShape::internal(format!(
                    "handler for '{}' did not respond within {} ms",
                    timer.method(),
                    timeout.as_millis()
                )),
            )
        }
    };

    diagnostics.finish(timer, &response);
    Some(response)
}

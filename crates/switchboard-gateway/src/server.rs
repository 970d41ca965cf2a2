//! WebSocket gateway server.

use crate::connection::{Connection, ConnectionRegistry};
use crate::diagnostics::TransportDiagnostics;
use crate::dispatcher::ConnectionDispatcher;
use crate::handlers::{self, HandlerContext, ToolExecutor};
use crate::methods::MethodRegistry;
use crate::protocol::{ErrorCode, ErrorShape, EventFrame};
use crate::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        ConnectInfo, State, WebSocketUpgrade,
    },
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use switchboard_core::config::BindMode;
use switchboard_core::{Config, ToolPolicy};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

/// Allowed origins for CORS and WebSocket origin validation.
const ALLOWED_ORIGINS: &[&str] = &[
    "http://localhost",
    "http://127.0.0.1",
    "https://localhost",
    "https://127.0.0.1",
];

/// Gateway server state.
pub struct GatewayState {
    /// Method registry.
    pub methods: Arc<MethodRegistry>,

    /// Configuration.
    pub config: Arc<Config>,

    /// Live connections.
    pub connections: Arc<ConnectionRegistry>,

    /// Transport diagnostics shared by every connection.
    pub diagnostics: Arc<TransportDiagnostics>,

    /// Default tool policy for new connections.
    pub policy: Arc<ToolPolicy>,

    /// Server-push events, pre-serialized.
    pub broadcast_tx: broadcast::Sender<String>,

    /// One permit per allowed concurrent connection.
    slots: Arc<Semaphore>,

    /// Cancelled when the server stops.
    shutdown: CancellationToken,

    started_at: Instant,
}

impl GatewayState {
    /// Validate the WebSocket Origin header.
    fn validate_origin(&self, headers: &HeaderMap) -> bool {
        // Loopback: any origin is fine
        if self.config.gateway.bind == BindMode::Loopback {
            return true;
        }

        let origin = match headers.get(header::ORIGIN).and_then(|v| v.to_str().ok()) {
            Some(o) => o,
            None => return true, // Non-browser client
        };

        if is_trusted_origin(origin) {
            return true;
        }

        warn!("Rejected WebSocket connection from untrusted origin: {}", origin);
        false
    }
}

/// Per-connection inbound message limiter over one-second windows.
#[derive(Debug)]
pub struct MessageRateLimiter {
    max_per_second: u64,
    count: u64,
    window_start: Instant,
}

impl MessageRateLimiter {
    pub fn new(max_per_second: u64) -> Self {
        Self {
            max_per_second,
            count: 0,
            window_start: Instant::now(),
        }
    }

    /// Returns `true` if the message should be processed.
    pub fn check(&mut self) -> bool {
        let now = Instant::now();
        if now.duration_since(self.window_start) >= Duration::from_secs(1) {
            self.count = 0;
            self.window_start = now;
        }
        self.count += 1;
        self.count <= self.max_per_second
    }
}

/// The WebSocket gateway server.
pub struct Gateway {
    state: Arc<GatewayState>,
}

impl Gateway {
    /// Create a gateway with the built-in handlers registered.
    pub fn new(config: Config) -> Result<Self> {
        Self::build(config, None)
    }

    /// Create a gateway whose `tools.invoke` delegates to `executor`.
    pub fn with_tool_executor(config: Config, executor: Arc<dyn ToolExecutor>) -> Result<Self> {
        Self::build(config, Some(executor))
    }

    fn build(config: Config, executor: Option<Arc<dyn ToolExecutor>>) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);

        let mut context = HandlerContext::new(config.clone())?;
        if let Some(executor) = executor {
            context = context.with_tool_executor(executor);
        }
        let connections = context.connections.clone();
        let diagnostics = context.diagnostics.clone();

        let methods = Arc::new(MethodRegistry::new());
        handlers::register_all(&methods, context)?;

        let (broadcast_tx, _) = broadcast::channel(256);
        let max_connections = config.gateway.max_connections.min(Semaphore::MAX_PERMITS);
        let state = Arc::new(GatewayState {
            methods,
            policy: Arc::new(config.tools.compile()),
            config,
            connections,
            diagnostics,
            broadcast_tx,
            slots: Arc::new(Semaphore::new(max_connections)),
            shutdown: CancellationToken::new(),
            started_at: Instant::now(),
        });

        Ok(Self { state })
    }

    /// Method registry, for registering extra handlers before serving.
    pub fn methods(&self) -> &Arc<MethodRegistry> {
        &self.state.methods
    }

    /// Live connections.
    pub fn connections(&self) -> &Arc<ConnectionRegistry> {
        &self.state.connections
    }

    /// Transport diagnostics.
    pub fn diagnostics(&self) -> &Arc<TransportDiagnostics> {
        &self.state.diagnostics
    }

    /// Run until Ctrl-C.
    pub async fn run(&self) -> Result<()> {
        let addr = self.bind_address();

        if self.state.config.gateway.bind != BindMode::Loopback {
            warn!("Gateway binding to {}, reachable from the network", addr);
        }

        let listener = TcpListener::bind(addr).await?;
        self.serve(listener, shutdown_signal()).await
    }

    /// Serve on `listener` until `shutdown` completes or [`stop`](Self::stop) is called.
    ///
    /// Seals the method registry.
    pub async fn serve<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.state.methods.seal();

        let local = listener.local_addr()?;
        info!(
            "Gateway listening on {} ({} methods)",
            local,
            self.state.methods.len()
        );

        let ticker = self.spawn_ticker();
        let token = self.state.shutdown.clone();
        let app = self.create_router();

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            tokio::select! {
                _ = shutdown => {}
                _ = token.cancelled() => {}
            }
            token.cancel();
        })
        .await?;

        ticker.abort();
        info!("Gateway stopped");
        Ok(())
    }

    /// Stop serving and close every connection.
    pub fn stop(&self) {
        self.state.shutdown.cancel();
    }

    /// Broadcast an event to every connected client.
    pub fn broadcast(&self, event: &EventFrame) {
        let _ = self.state.broadcast_tx.send(event.to_text());
    }

    fn spawn_ticker(&self) -> tokio::task::JoinHandle<()> {
        let state = self.state.clone();
        let period = Duration::from_millis(state.config.gateway.tick_interval_ms);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                let tick = EventFrame::new("tick", json!({ "ts": chrono::Utc::now().timestamp_millis() }));
                let _ = state.broadcast_tx.send(tick.to_text());
            }
        })
    }

    /// Create the Axum router.
    fn create_router(&self) -> Router {
        Router::new()
            .route("/ws", get(ws_handler))
            .route("/health", get(health_handler))
            .layer(create_cors_layer())
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }

    /// Get the bind address.
    fn bind_address(&self) -> SocketAddr {
        let ip = match self.state.config.gateway.bind {
            BindMode::Loopback => [127, 0, 0, 1],
            BindMode::Lan => [0, 0, 0, 0],
        };

        SocketAddr::from((ip, self.state.config.gateway.port))
    }
}

/// Whether `origin` is one of [`ALLOWED_ORIGINS`], optionally with a port.
///
/// The host must match exactly; `http://localhost.example.com` is not local.
fn is_trusted_origin(origin: &str) -> bool {
    ALLOWED_ORIGINS.iter().any(|allowed| match origin.strip_prefix(allowed) {
        Some("") => true,
        Some(rest) => rest
            .strip_prefix(':')
            .map_or(false, |port| !port.is_empty() && port.parse::<u16>().is_ok()),
        None => false,
    })
}

/// CORS for local tooling.
fn create_cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(|origin: &HeaderValue, _| {
            origin.to_str().map_or(false, is_trusted_origin)
        }))
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .max_age(Duration::from_secs(3600))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    info!("Shutdown signal received");
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<Arc<GatewayState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> std::result::Result<impl IntoResponse, StatusCode> {
    if !state.validate_origin(&headers) {
        return Err(StatusCode::FORBIDDEN);
    }

    // Held by the socket task until the connection ends
    let Ok(permit) = state.slots.clone().try_acquire_owned() else {
        warn!(
            "Max connections ({}) reached, rejecting {}",
            state.config.gateway.max_connections, addr
        );
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, addr, permit)))
}

/// Handle a WebSocket connection.
async fn handle_socket(
    socket: WebSocket,
    state: Arc<GatewayState>,
    remote_addr: SocketAddr,
    _permit: OwnedSemaphorePermit,
) {
    let connection = Connection::new();
    let conn_id = connection.id().to_string();
    state.connections.upsert(connection.summary()).await;
    info!(conn_id = %conn_id, remote = %remote_addr, "Client connected");

    let (dispatcher, mut responses) = ConnectionDispatcher::new(
        connection,
        state.methods.clone(),
        state.diagnostics.clone(),
        state.policy.clone(),
    );

    let (mut sender, mut receiver) = socket.split();
    let mut events = state.broadcast_tx.subscribe();
    let mut limiter = MessageRateLimiter::new(state.config.gateway.max_messages_per_second);
    let handshake_deadline =
        tokio::time::sleep(Duration::from_millis(state.config.gateway.handshake_timeout_ms));
    tokio::pin!(handshake_deadline);
    let mut announced = false;

    loop {
        tokio::select! {
            msg = receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    if !limiter.check() {
                        dispatcher.reject_text(
                            &text,
                            ErrorShape::new(ErrorCode::RateLimited, "rate limit exceeded"),
                        );
                        continue;
                    }
                    dispatcher.handle_text(&text).await;
                    if !announced && dispatcher.is_connected() {
                        announced = true;
                        state.connections.upsert(dispatcher.connection().summary()).await;
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    debug!(conn_id = %conn_id, "Client closed connection");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(conn_id = %conn_id, "WebSocket error: {}", e);
                    break;
                }
            },
            Some(response) = responses.recv() => {
                if let Err(e) = sender.send(Message::Text(response.to_text())).await {
                    error!(conn_id = %conn_id, "Failed to send response: {}", e);
                    break;
                }
            }
            event = events.recv() => match event {
                Ok(text) => {
                    if dispatcher.is_connected() && sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(conn_id = %conn_id, skipped, "Client lagging behind broadcasts");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = &mut handshake_deadline, if !dispatcher.is_connected() => {
                info!(conn_id = %conn_id, "Handshake timed out");
                let _ = sender.send(Message::Close(None)).await;
                break;
            }
            _ = state.shutdown.cancelled() => {
                let event = EventFrame::new("shutdown", json!({ "reason": "gateway stopping" }));
                let _ = sender.send(Message::Text(event.to_text())).await;
                let _ = sender.send(Message::Close(None)).await;
                break;
            }
        }
    }

    dispatcher.close();
    state.connections.remove(&conn_id).await;
    info!(conn_id = %conn_id, "Client disconnected");
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let connections = state.connections.count().await;
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_seconds": state.started_at.elapsed().as_secs(),
        "connections": connections,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state_with(bind: BindMode) -> GatewayState {
        let mut config = Config::default();
        config.gateway.bind = bind;
        let config = Arc::new(config);
        GatewayState {
            methods: Arc::new(MethodRegistry::new()),
            policy: Arc::new(config.tools.compile()),
            config,
            connections: Arc::new(ConnectionRegistry::new()),
            diagnostics: Arc::new(TransportDiagnostics::default()),
            broadcast_tx: broadcast::channel(10).0,
            slots: Arc::new(Semaphore::new(1)),
            shutdown: CancellationToken::new(),
            started_at: Instant::now(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limiter_window() {
        let mut limiter = MessageRateLimiter::new(3);
        assert!(limiter.check());
        assert!(limiter.check());
        assert!(limiter.check());
        assert!(!limiter.check());

        tokio::time::advance(Duration::from_millis(1001)).await;
        assert!(limiter.check());
    }

    #[test]
    fn test_origin_validation_loopback() {
        let state = state_with(BindMode::Loopback);
        let mut headers = HeaderMap::new();
        headers.insert(header::ORIGIN, "https://evil.com".parse().unwrap());
        assert!(state.validate_origin(&headers));
    }

    #[test]
    fn test_origin_validation_rejects_unknown() {
        let state = state_with(BindMode::Lan);
        let mut headers = HeaderMap::new();
        headers.insert(header::ORIGIN, "https://evil.com".parse().unwrap());
        assert!(!state.validate_origin(&headers));
    }

    #[test]
    fn test_origin_validation_allows_localhost() {
        let state = state_with(BindMode::Lan);
        let mut headers = HeaderMap::new();
        headers.insert(header::ORIGIN, "http://localhost:3000".parse().unwrap());
        assert!(state.validate_origin(&headers));
        assert!(state.validate_origin(&HeaderMap::new()));
    }

    #[test]
    fn test_origin_validation_rejects_look_alike_hosts() {
        let state = state_with(BindMode::Lan);
        for origin in [
            "http://localhost.evil.com",
            "http://127.0.0.1.attacker.net",
            "https://localhost@evil.com",
            "http://localhost:80.evil.com",
            "http://localhost:",
            "http://localhostx",
        ] {
            let mut headers = HeaderMap::new();
            headers.insert(header::ORIGIN, origin.parse().unwrap());
            assert!(!state.validate_origin(&headers), "accepted {}", origin);
        }
    }

    #[test]
    fn test_trusted_origin_forms() {
        assert!(is_trusted_origin("http://localhost"));
        assert!(is_trusted_origin("https://127.0.0.1:8443"));
        assert!(!is_trusted_origin("http://127.0.0.1:99999"));
        assert!(!is_trusted_origin("ftp://localhost"));
    }

    #[test]
    fn test_connection_slots_are_reserved_up_front() {
        let state = state_with(BindMode::Loopback);

        let held = state.slots.clone().try_acquire_owned().unwrap();
        assert!(state.slots.clone().try_acquire_owned().is_err());

        drop(held);
        assert!(state.slots.clone().try_acquire_owned().is_ok());
    }

    #[test]
    fn test_new_rejects_invalid_config() {
        let mut config = Config::default();
        config.gateway.bind = BindMode::Lan;
        assert!(Gateway::new(config).is_err());
    }

    #[test]
    fn test_bind_address() {
        let mut config = Config::default();
        config.gateway.port = 9999;
        let gateway = Gateway::new(config).unwrap();
        assert_eq!(gateway.bind_address(), "127.0.0.1:9999".parse().unwrap());
        assert!(gateway.methods().contains("connect"));
    }
}

//! Method registry and the handler contract.
//!
//! A handler receives a [`RequestContext`] and a [`Responder`]. It answers
//! through the responder exactly once, either before returning or from a
//! task it spawns. Returning `Err` without answering produces an error
//! response classified from the error; a panic produces `INTERNAL_ERROR`.

use crate::connection::ClientInfo;
use crate::error::GatewayError;
use crate::protocol::{ErrorShape, ResponseFrame};
use crate::queue::KeyedQueue;
use crate::Result;
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use switchboard_core::ToolPolicy;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, error, warn};

/// Trait for RPC method handlers.
#[async_trait]
pub trait MethodHandler: Send + Sync {
    /// Handle one request.
    async fn handle(&self, ctx: RequestContext, respond: Responder) -> Result<()>;

    /// Key under which requests must run in the order they were dispatched.
    ///
    /// Requests sharing a key run one at a time, across connections.
    fn serial_key(&self, _ctx: &RequestContext) -> Option<String> {
        None
    }
}

/// Everything a handler gets to know about the request it serves.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Connection the request arrived on.
    pub conn_id: String,

    /// Caller-supplied request id.
    pub request_id: Value,

    /// Method name.
    pub method: String,

    /// Raw parameters.
    pub params: Option<Value>,

    /// Client info from the handshake, if completed.
    pub client: Option<ClientInfo>,

    /// Tool policy in effect for the connection.
    pub policy: Arc<ToolPolicy>,
}

impl RequestContext {
    /// Create a context with no params, no client and a deny-all policy.
    pub fn new(conn_id: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            conn_id: conn_id.into(),
            request_id: Value::Null,
            method: method.into(),
            params: None,
            client: None,
            policy: Arc::new(ToolPolicy::default()),
        }
    }

    /// Set the request id.
    pub fn with_request_id(mut self, id: Value) -> Self {
        self.request_id = id;
        self
    }

    /// Set the params.
    pub fn with_params(mut self, params: Value) -> Self {
        self.params = Some(params);
        self
    }

    /// Set the client info.
    pub fn with_client(mut self, client: Option<ClientInfo>) -> Self {
        self.client = client;
        self
    }

    /// Set the tool policy.
    pub fn with_policy(mut self, policy: Arc<ToolPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Deserialize the params. Missing params read as an empty object.
    pub fn params<T: DeserializeOwned>(&self) -> Result<T> {
        let value = self
            .params
            .clone()
            .unwrap_or_else(|| Value::Object(Default::default()));
        serde_json::from_value(value).map_err(|e| GatewayError::InvalidParams(e.to_string()))
    }
}

/// A handler's answer.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub success: bool,
    pub result: Option<Value>,
    pub error: Option<ErrorShape>,
}

impl Reply {
    /// Successful reply.
    pub fn success(result: Option<Value>) -> Self {
        Self {
            success: true,
            result,
            error: None,
        }
    }

    /// Failed reply.
    pub fn failure(error: ErrorShape) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error),
        }
    }

    /// Build the response frame for request `id`.
    pub fn into_frame(self, id: Value) -> ResponseFrame {
        if self.success {
            return ResponseFrame::success(id, self.result);
        }
        let error = self
            .error
            .unwrap_or_else(|| ErrorShape::internal("handler reported failure without an error"));
        ResponseFrame::failure(id, error)
    }
}

/// One-shot callback a handler uses to answer its request.
///
/// Only the first reply is delivered; later ones are discarded.
pub struct Responder {
    slot: Arc<Mutex<Option<oneshot::Sender<Reply>>>>,
}

impl Responder {
    /// Create a responder and the receiver its reply arrives on.
    pub fn channel() -> (Self, oneshot::Receiver<Reply>) {
        let (tx, rx) = oneshot::channel();
        let responder = Self {
            slot: Arc::new(Mutex::new(Some(tx))),
        };
        (responder, rx)
    }

    /// Answer with an explicit success flag, result and error.
    ///
    /// Returns false if a reply was already delivered or nobody is waiting.
    pub fn respond(self, success: bool, result: Option<Value>, error: Option<ErrorShape>) -> bool {
        self.send(Reply {
            success,
            result,
            error,
        })
    }

    /// Answer with a successful result.
    pub fn ok(self, result: Value) -> bool {
        self.send(Reply::success(Some(result)))
    }

    /// Answer with an error.
    pub fn error(self, error: ErrorShape) -> bool {
        self.send(Reply::failure(error))
    }

    /// Whether a reply has been delivered.
    pub fn has_responded(&self) -> bool {
        self.slot.lock().is_none()
    }

    pub(crate) fn share(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }

    pub(crate) fn send(&self, reply: Reply) -> bool {
        match self.slot.lock().take() {
            Some(tx) => tx.send(reply).is_ok(),
            None => false,
        }
    }

    fn holders(&self) -> usize {
        Arc::strong_count(&self.slot)
    }
}

/// Errors from registering methods.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("method name must not be empty")]
    EmptyName,

    #[error("method '{0}' is already registered")]
    Duplicate(String),

    #[error("registry is sealed, cannot change '{0}'")]
    Sealed(String),
}

/// Registry for RPC methods.
///
/// Names are unique: registering an existing name fails. Once sealed the
/// set of methods is fixed.
pub struct MethodRegistry {
    methods: RwLock<HashMap<String, Arc<dyn MethodHandler>>>,
    sealed: AtomicBool,
    ordering: KeyedQueue,
}

impl Default for MethodRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MethodRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            methods: RwLock::new(HashMap::new()),
            sealed: AtomicBool::new(false),
            ordering: KeyedQueue::new(),
        }
    }

    /// Register a method handler.
    pub fn register(
        &self,
        name: impl Into<String>,
        handler: Arc<dyn MethodHandler>,
    ) -> std::result::Result<(), RegistryError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if self.is_sealed() {
            return Err(RegistryError::Sealed(name));
        }

        let mut methods = self.methods.write();
        if methods.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }
        debug!("Registered method: {}", name);
        methods.insert(name, handler);
        Ok(())
    }

    /// Unregister a method. Returns whether it was registered.
    pub fn unregister(&self, name: &str) -> std::result::Result<bool, RegistryError> {
        if self.is_sealed() {
            return Err(RegistryError::Sealed(name.to_string()));
        }
        Ok(self.methods.write().remove(name).is_some())
    }

    /// Look up a handler.
    pub fn get(&self, name: &str) -> Option<Arc<dyn MethodHandler>> {
        self.methods.read().get(name).cloned()
    }

    /// Whether a method is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.methods.read().contains_key(name)
    }

    /// Registered method names, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.methods.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered methods.
    pub fn len(&self) -> usize {
        self.methods.read().len()
    }

    /// Whether no methods are registered.
    pub fn is_empty(&self) -> bool {
        self.methods.read().is_empty()
    }

    /// Freeze the method set.
    pub fn seal(&self) {
        self.sealed.store(true, Ordering::Release);
    }

    /// Whether the registry is sealed.
    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    /// Like [`dispatch`](Self::dispatch), but requests whose handler names a
    /// [`serial_key`](MethodHandler::serial_key) take their place in line
    /// now, before the returned future is polled. Spawning the futures in
    /// call order keeps same-key requests in that order.
    pub fn dispatch_in_order(
        self: &Arc<Self>,
        ctx: RequestContext,
        respond: Responder,
    ) -> BoxFuture<'static, ()> {
        let key = self.get(&ctx.method).and_then(|h| h.serial_key(&ctx));
        let registry = Arc::clone(self);
        let task = async move { registry.dispatch(ctx, respond).await };
        match key {
            Some(key) => self.ordering.serialize_by_key(key, task).boxed(),
            None => task.boxed(),
        }
    }

    /// Route a request to its handler.
    ///
    /// Always leads to exactly one reply unless the handler keeps the
    /// responder alive past its return without answering.
    pub async fn dispatch(&self, ctx: RequestContext, respond: Responder) {
        let Some(handler) = self.get(&ctx.method) else {
            respond.error(ErrorShape::method_not_found(&ctx.method));
            return;
        };

        let method = ctx.method.clone();
        let guard = respond.share();
        let outcome = AssertUnwindSafe(handler.handle(ctx, respond))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(())) => {
                if !guard.has_responded() && guard.holders() == 1 {
                    warn!(method = %method, "Handler completed without responding");
                    guard.send(Reply::failure(ErrorShape::internal(format!(
                        "handler for '{}' completed without responding",
                        method
                    ))));
                }
            }
            Ok(Err(e)) => {
                if !guard.send(Reply::failure(e.to_shape())) {
                    warn!(method = %method, error = %e, "Handler failed after responding");
                } else {
                    debug!(method = %method, error = %e, "Handler failed");
                }
            }
            Err(panic) => {
                error!(method = %method, panic = %panic_message(&*panic), "Handler panicked");
                guard.send(Reply::failure(ErrorShape::internal(format!(
                    "handler for '{}' panicked",
                    method
                ))));
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> MethodHandler for FnHandler<F>
where
    F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<Value, ErrorShape>> + Send + 'static,
{
    async fn handle(&self, ctx: RequestContext, respond: Responder) -> Result<()> {
        match (self.0)(ctx).await {
            Ok(result) => respond.ok(result),
            Err(error) => respond.error(error),
        };
        Ok(())
    }
}

/// Build a handler from an async closure.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn MethodHandler>
where
    F: Fn(RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<Value, ErrorShape>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

//! Handshake enforcement against the full built-in method set.
//!
//! These tests drive a `ConnectionDispatcher` directly, without a socket,
//! using the registry a real `Gateway` builds.

use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use switchboard_gateway::{
    handler_fn, Connection, ConnectionDispatcher, ConnectionState, ErrorCode, ErrorShape, Gateway,
    RequestContext, ResponseFrame,
};
use switchboard_integration_tests::{connect_frame, request_frame, test_config};
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;

struct Harness {
    dispatcher: ConnectionDispatcher,
    rx: UnboundedReceiver<ResponseFrame>,
    spy_calls: Arc<AtomicUsize>,
    _dir: TempDir,
}

/// Gateway registry plus a `test.spy` method that counts its calls.
fn harness() -> Harness {
    let dir = TempDir::new().unwrap();
    let config = test_config(dir.path());
    let policy = Arc::new(config.tools.compile());
    let gateway = Gateway::new(config).unwrap();

    let spy_calls = Arc::new(AtomicUsize::new(0));
    let calls = spy_calls.clone();
    gateway
        .methods()
        .register(
            "test.spy",
            handler_fn(move |_ctx: RequestContext| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(json!({ "spied": true }))
                }
            }),
        )
        .unwrap();
    gateway
        .methods()
        .register(
            "test.fail",
            handler_fn(|_ctx: RequestContext| async move {
                Err(ErrorShape::new(ErrorCode::Unavailable, "backend offline"))
            }),
        )
        .unwrap();

    let (dispatcher, rx) = ConnectionDispatcher::new(
        Connection::with_id("conn-it"),
        gateway.methods().clone(),
        gateway.diagnostics().clone(),
        policy,
    );

    Harness {
        dispatcher,
        rx,
        spy_calls,
        _dir: dir,
    }
}

async fn roundtrip(h: &mut Harness, text: String) -> ResponseFrame {
    h.dispatcher.handle_text(&text).await;
    h.rx.recv().await.unwrap()
}

async fn connect(h: &mut Harness) {
    let response = roundtrip(h, connect_frame("c")).await;
    assert!(response.success, "connect failed: {:?}", response.error);
}

#[tokio::test]
async fn test_request_before_connect_never_reaches_handler() {
    let mut h = harness();

    let response = roundtrip(&mut h, request_frame("1", "test.spy", json!({}))).await;

    assert!(!response.success);
    assert_eq!(response.id, json!("1"));
    assert_eq!(response.error_code(), Some(ErrorCode::InvalidRequest));
    assert_eq!(h.spy_calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.dispatcher.state(), ConnectionState::Uninitialized);
}

#[tokio::test]
async fn test_ping_before_connect_then_after() {
    let mut h = harness();

    let early = roundtrip(&mut h, request_frame("p1", "ping", json!({}))).await;
    assert_eq!(early.error_code(), Some(ErrorCode::InvalidRequest));

    connect(&mut h).await;
    assert!(h.dispatcher.is_connected());

    let ping = roundtrip(&mut h, request_frame("p2", "ping", json!({}))).await;
    assert!(ping.success);
    assert_eq!(ping.id, json!("p2"));
    assert_eq!(ping.result.unwrap()["pong"], json!(true));
}

#[tokio::test]
async fn test_connect_result_lists_methods() {
    let mut h = harness();

    let response = roundtrip(&mut h, connect_frame("c")).await;
    let result = response.result.unwrap();

    assert_eq!(result["protocol"], json!(1));
    assert_eq!(result["conn_id"], json!("conn-it"));
    let methods: Vec<&str> = result["features"]["methods"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(Value::as_str)
        .collect();
    for name in ["connect", "ping", "health", "system.methods", "test.spy"] {
        assert!(methods.contains(&name), "missing {}", name);
    }
}

#[tokio::test]
async fn test_spy_called_once_connected() {
    let mut h = harness();
    connect(&mut h).await;

    let response = roundtrip(&mut h, request_frame("s", "test.spy", json!({}))).await;

    assert!(response.success);
    assert_eq!(response.result, Some(json!({ "spied": true })));
    assert_eq!(h.spy_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unknown_method_after_connect() {
    let mut h = harness();
    connect(&mut h).await;

    let response = roundtrip(&mut h, request_frame("u", "nope.nothing", json!({}))).await;

    assert_eq!(response.error_code(), Some(ErrorCode::MethodNotFound));
    assert_eq!(response.id, json!("u"));
}

#[tokio::test]
async fn test_handler_failure_is_passed_through() {
    let mut h = harness();
    connect(&mut h).await;

    let response = roundtrip(&mut h, request_frame("f", "test.fail", json!({}))).await;

    let error = response.error.unwrap();
    assert_eq!(error.code, ErrorCode::Unavailable);
    assert_eq!(error.message, "backend offline");
}

#[tokio::test]
async fn test_bad_connect_params_keep_connection_uninitialized() {
    let mut h = harness();

    let response = roundtrip(
        &mut h,
        request_frame("c", "connect", json!({ "min_protocol": 2, "max_protocol": 3 })),
    )
    .await;

    assert!(!response.success);
    assert_eq!(h.dispatcher.state(), ConnectionState::Uninitialized);

    connect(&mut h).await;
    assert!(h.dispatcher.is_connected());
}

#[tokio::test]
async fn test_second_connect_rejected() {
    let mut h = harness();
    connect(&mut h).await;

    let response = roundtrip(&mut h, connect_frame("again")).await;

    assert_eq!(response.error_code(), Some(ErrorCode::InvalidRequest));
    assert!(h.dispatcher.is_connected());
}

#[tokio::test]
async fn test_tools_check_uses_policy() {
    let mut h = harness();
    connect(&mut h).await;

    let response = roundtrip(
        &mut h,
        request_frame("t", "tools.check", json!({ "tool": "bash" })),
    )
    .await;

    assert!(response.success);
    assert_eq!(response.result.unwrap()["allowed"], json!(true));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_skill_updates_apply_in_arrival_order() {
    let mut h = harness();
    connect(&mut h).await;

    let rounds = 20;
    for i in 0..rounds {
        for enabled in [true, false] {
            let frame = request_frame(
                &format!("u{}-{}", i, enabled),
                "skills.update",
                json!({ "skill_key": "weather", "enabled": enabled }),
            );
            h.dispatcher.handle_text(&frame).await;
        }
    }
    for _ in 0..rounds * 2 {
        assert!(h.rx.recv().await.unwrap().success);
    }

    let status = roundtrip(&mut h, request_frame("s", "skills.status", json!({}))).await;
    let skills = status.result.unwrap()["skills"].clone();
    let weather = skills
        .as_array()
        .unwrap()
        .iter()
        .find(|s| s["skill_key"] == json!("weather"))
        .cloned()
        .unwrap();
    assert_eq!(weather["enabled"], json!(false));
}

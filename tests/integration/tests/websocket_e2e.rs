//! End-to-end tests over a real WebSocket on a loopback port.

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use switchboard_core::Config;
use switchboard_gateway::Gateway;
use switchboard_integration_tests::{connect_frame, request_frame, test_config};
use tempfile::TempDir;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct Running {
    gateway: Arc<Gateway>,
    url: String,
    _dir: TempDir,
}

async fn start(configure: impl FnOnce(&mut Config)) -> Running {
    let dir = TempDir::new().unwrap();
    let mut config = test_config(dir.path());
    configure(&mut config);

    let gateway = Arc::new(Gateway::new(config).unwrap());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = gateway.clone();
    tokio::spawn(async move {
        server
            .serve(listener, std::future::pending::<()>())
            .await
            .unwrap();
    });

    Running {
        gateway,
        url: format!("ws://{}/ws", addr),
        _dir: dir,
    }
}

async fn open(running: &Running) -> Client {
    let (client, _) = connect_async(running.url.as_str()).await.unwrap();
    client
}

/// Next frame that is not an event.
async fn next_response(client: &mut Client) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("socket closed")
            .unwrap();
        if let Message::Text(text) = msg {
            let value: Value = serde_json::from_str(&text).unwrap();
            if value.get("event").is_none() {
                return value;
            }
        }
    }
}

async fn call(client: &mut Client, text: String) -> Value {
    client.send(Message::Text(text)).await.unwrap();
    next_response(client).await
}

#[tokio::test]
async fn test_ping_requires_connect() {
    let running = start(|_| {}).await;
    let mut client = open(&running).await;

    let early = call(&mut client, request_frame("1", "ping", json!({}))).await;
    assert_eq!(early["id"], json!("1"));
    assert_eq!(early["success"], json!(false));
    assert_eq!(early["error"]["code"], json!("INVALID_REQUEST"));

    let hello = call(&mut client, connect_frame("2")).await;
    assert_eq!(hello["success"], json!(true));
    assert_eq!(hello["result"]["protocol"], json!(1));
    assert_eq!(hello["result"]["server"]["name"], json!("switchboard"));

    let ping = call(&mut client, request_frame("3", "ping", json!({}))).await;
    assert_eq!(ping["success"], json!(true));
    assert_eq!(ping["result"]["pong"], json!(true));
}

#[tokio::test]
async fn test_malformed_frame_gets_invalid_request() {
    let running = start(|_| {}).await;
    let mut client = open(&running).await;

    let response = call(&mut client, "{not json".to_string()).await;

    assert_eq!(response["id"], Value::Null);
    assert_eq!(response["error"]["code"], json!("INVALID_REQUEST"));
}

#[tokio::test]
async fn test_auth_token_enforced() {
    let running = start(|c| c.gateway.auth_token = Some("s3cret".to_string())).await;
    let mut client = open(&running).await;

    let denied = call(&mut client, connect_frame("1")).await;
    assert_eq!(denied["error"]["code"], json!("UNAUTHORIZED"));

    let with_token = request_frame(
        "2",
        "connect",
        json!({
            "min_protocol": 1,
            "max_protocol": 1,
            "client": { "id": "integration" },
            "auth": { "token": "s3cret" }
        }),
    );
    let accepted = call(&mut client, with_token).await;
    assert_eq!(accepted["success"], json!(true));
}

#[tokio::test]
async fn test_presence_lists_connected_clients() {
    let running = start(|_| {}).await;
    let mut first = open(&running).await;
    let mut second = open(&running).await;

    assert_eq!(call(&mut first, connect_frame("a")).await["success"], json!(true));
    assert_eq!(call(&mut second, connect_frame("b")).await["success"], json!(true));

    let presence = call(&mut first, request_frame("p", "system.presence", json!({}))).await;
    assert_eq!(presence["success"], json!(true));
    assert_eq!(presence["result"]["count"], json!(2));
}

#[tokio::test]
async fn test_skills_update_over_socket() {
    let running = start(|_| {}).await;
    let mut client = open(&running).await;
    call(&mut client, connect_frame("c")).await;

    let updated = call(
        &mut client,
        request_frame(
            "u",
            "skills.update",
            json!({ "skill_key": "weather", "enabled": false, "api_key": "k" }),
        ),
    )
    .await;
    assert_eq!(updated["success"], json!(true));
    assert_eq!(updated["result"]["skill"]["enabled"], json!(false));
    assert_eq!(updated["result"]["skill"]["has_api_key"], json!(true));

    let status = call(&mut client, request_frame("s", "skills.status", json!({}))).await;
    let text = status.to_string();
    assert!(text.contains("weather"));
    assert!(!text.contains("\"k\""));
}

#[tokio::test]
async fn test_handshake_deadline_closes_socket() {
    let running = start(|c| c.gateway.handshake_timeout_ms = 200).await;
    let mut client = open(&running).await;

    let closed = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(msg) = client.next().await {
            match msg {
                Ok(Message::Close(_)) | Err(_) => return true,
                Ok(_) => {}
            }
        }
        true
    })
    .await
    .unwrap();

    assert!(closed);
}

#[tokio::test]
async fn test_stop_sends_shutdown_event() {
    let running = start(|_| {}).await;
    let mut client = open(&running).await;
    call(&mut client, connect_frame("c")).await;

    running.gateway.stop();

    let event = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(Ok(msg)) = client.next().await {
            if let Message::Text(text) = msg {
                let value: Value = serde_json::from_str(&text).unwrap();
                if value["event"] == json!("shutdown") {
                    return Some(value);
                }
            }
        }
        None
    })
    .await
    .unwrap();

    assert!(event.is_some());
}

#[tokio::test]
async fn test_rate_limited_frame_keeps_its_id() {
    let running = start(|c| c.gateway.max_messages_per_second = 2).await;
    let mut client = open(&running).await;

    for text in [
        connect_frame("c"),
        request_frame("p", "ping", json!({})),
        request_frame("r-x", "ping", json!({})),
    ] {
        client.send(Message::Text(text)).await.unwrap();
    }

    let mut limited = None;
    for _ in 0..3 {
        let response = next_response(&mut client).await;
        if response["id"] == json!("r-x") {
            limited = Some(response);
        }
    }

    let limited = limited.expect("no response for r-x");
    assert_eq!(limited["success"], json!(false));
    assert_eq!(limited["error"]["code"], json!("RATE_LIMITED"));
}

#[tokio::test]
async fn test_upgrade_refused_beyond_max_connections() {
    let running = start(|c| c.gateway.max_connections = 1).await;
    let mut first = open(&running).await;
    assert_eq!(call(&mut first, connect_frame("a")).await["success"], json!(true));

    let err = connect_async(running.url.as_str()).await.unwrap_err();
    match err {
        tokio_tungstenite::tungstenite::Error::Http(response) => {
            assert_eq!(response.status().as_u16(), 503);
        }
        other => panic!("expected HTTP 503, got {:?}", other),
    }

    let ping = call(&mut first, request_frame("p", "ping", json!({}))).await;
    assert_eq!(ping["success"], json!(true));
}

#[tokio::test]
async fn test_ticks_reach_only_connected_clients() {
    let running = start(|c| {
        c.gateway.tick_interval_ms = 100;
        c.gateway.handshake_timeout_ms = 10_000;
    })
    .await;
    let mut connected = open(&running).await;
    let mut waiting = open(&running).await;
    call(&mut connected, connect_frame("c")).await;

    let tick = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(Ok(msg)) = connected.next().await {
            if let Message::Text(text) = msg {
                let value: Value = serde_json::from_str(&text).unwrap();
                if value["event"] == json!("tick") {
                    return Some(value);
                }
            }
        }
        None
    })
    .await
    .unwrap();
    assert!(tick.unwrap()["payload"]["ts"].is_i64());

    let silent = tokio::time::timeout(Duration::from_millis(500), waiting.next()).await;
    assert!(silent.is_err(), "unconnected client received {:?}", silent);
}

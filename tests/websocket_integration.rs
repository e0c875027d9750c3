//! End-to-end tests using a real WebSocket client against a bound server.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use ws_message_counter::config::Settings;
use ws_message_counter::server::{create_app, AppState};

const TIMEOUT: Duration = Duration::from_secs(5);

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

fn test_settings() -> Settings {
    let mut settings = Settings::default();
    settings.health.startup_delay = 0;
    settings.websocket.heartbeat_interval = 1;
    settings.websocket.graceful_shutdown_timeout = 3;
    settings.websocket.close_grace_period_ms = 50;
    settings
}

/// Boot a server on an ephemeral port and return its base ws:// URL
async fn boot_server(settings: Settings) -> (String, AppState) {
    let (state, _relay) = AppState::new(settings);
    let app = create_app(state.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("ws://{addr}"), state)
}

async fn connect(url: &str) -> WsStream {
    let (ws, _) = timeout(TIMEOUT, connect_async(url))
        .await
        .expect("timeout connecting")
        .expect("handshake failed");
    ws
}

async fn send_text(ws: &mut WsStream, text: &str) {
    ws.send(Message::text(text.to_string())).await.unwrap();
}

async fn read_json(ws: &mut WsStream) -> Value {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timeout waiting for message")
            .expect("stream closed")
            .expect("ws error");
        match msg {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            Message::Close(frame) => panic!("unexpected close: {:?}", frame),
            _ => continue,
        }
    }
}

/// Read until the server's close frame and return its code
async fn read_close_code(ws: &mut WsStream) -> u16 {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timeout waiting for close")
            .expect("stream closed without close frame")
            .expect("ws error");
        match msg {
            Message::Close(Some(frame)) => return u16::from(frame.code),
            Message::Close(None) => panic!("close frame without code"),
            Message::Text(text) => panic!("unexpected message before close: {}", text),
            _ => continue,
        }
    }
}

#[tokio::test]
async fn test_hello_empty_goodbye_scenario() {
    let (base, _state) = boot_server(test_settings()).await;
    let mut ws = connect(&format!("{base}/ws/chat/")).await;

    send_text(&mut ws, "hello").await;
    let reply = read_json(&mut ws).await;
    assert_eq!(reply["count"], 1);
    assert_eq!(reply["message"], "hello");
    let session_id = reply["session_id"].as_str().unwrap().to_string();
    assert!(!session_id.is_empty());

    send_text(&mut ws, "").await;
    send_text(&mut ws, "goodbye").await;

    assert_eq!(read_json(&mut ws).await, json!({"bye": true, "total": 1}));
    assert_eq!(read_close_code(&mut ws).await, 1000);
}

#[tokio::test]
async fn test_count_is_consecutive() {
    let (base, _state) = boot_server(test_settings()).await;
    let mut ws = connect(&format!("{base}/ws/chat")).await;

    for k in 1..=10 {
        send_text(&mut ws, &format!("message {k}")).await;
        let reply = read_json(&mut ws).await;
        assert_eq!(reply["count"], k);
    }
}

#[tokio::test]
async fn test_whitespace_gets_no_reply() {
    let (base, _state) = boot_server(test_settings()).await;
    let mut ws = connect(&format!("{base}/ws/chat/")).await;

    send_text(&mut ws, "   ").await;
    send_text(&mut ws, "real").await;

    // The first reply is for "real", and it is the first counted message
    let reply = read_json(&mut ws).await;
    assert_eq!(reply["count"], 1);
    assert_eq!(reply["message"], "real");
}

#[tokio::test]
async fn test_goodbye_any_case() {
    let (base, _state) = boot_server(test_settings()).await;
    let mut ws = connect(&format!("{base}/ws/chat/")).await;

    send_text(&mut ws, "a").await;
    read_json(&mut ws).await;
    send_text(&mut ws, "b").await;
    read_json(&mut ws).await;
    send_text(&mut ws, " GOODBYE ").await;

    assert_eq!(read_json(&mut ws).await, json!({"bye": true, "total": 2}));
    assert_eq!(read_close_code(&mut ws).await, 1000);
}

#[tokio::test]
async fn test_reconnect_resumes_count() {
    let (base, _state) = boot_server(test_settings()).await;
    let url = format!("{base}/ws/chat/?session_id=resume-me");

    let mut first = connect(&url).await;
    for _ in 0..3 {
        send_text(&mut first, "x").await;
        read_json(&mut first).await;
    }
    first.close(None).await.unwrap();

    let mut second = connect(&url).await;
    send_text(&mut second, "y").await;
    let reply = read_json(&mut second).await;

    assert_eq!(reply["count"], 4);
    assert_eq!(reply["session_id"], "resume-me");
}

#[tokio::test]
async fn test_unknown_session_id_starts_at_zero() {
    let (base, _state) = boot_server(test_settings()).await;
    let mut ws = connect(&format!("{base}/ws/chat/?session_id=unknown-123")).await;

    send_text(&mut ws, "first").await;

    assert_eq!(
        read_json(&mut ws).await,
        json!({"count": 1, "session_id": "unknown-123", "message": "first"})
    );
}

#[tokio::test]
async fn test_session_id_is_url_decoded() {
    let (base, _state) = boot_server(test_settings()).await;
    let mut ws = connect(&format!("{base}/ws/chat/?session_id=team%20a%2F1")).await;

    send_text(&mut ws, "hi").await;

    assert_eq!(read_json(&mut ws).await["session_id"], "team a/1");
}

#[tokio::test]
async fn test_repeated_session_id_uses_first_value() {
    let (base, _state) = boot_server(test_settings()).await;
    let mut ws = connect(&format!("{base}/ws/chat/?session_id=a&session_id=b")).await;

    send_text(&mut ws, "hi").await;

    assert_eq!(read_json(&mut ws).await["session_id"], "a");
}

#[tokio::test]
async fn test_invalid_utf8_binary_keeps_connection_open() {
    let (base, _state) = boot_server(test_settings()).await;
    let mut ws = connect(&format!("{base}/ws/chat/?session_id=bin")).await;

    ws.send(Message::binary(vec![0xff, 0xfe])).await.unwrap();
    assert_eq!(
        read_json(&mut ws).await,
        json!({"error": "Invalid UTF-8 payload", "session_id": "bin"})
    );

    ws.send(Message::binary(b"valid".to_vec())).await.unwrap();
    assert_eq!(read_json(&mut ws).await["count"], 1);
}

#[tokio::test]
async fn test_heartbeat_reaches_idle_connection() {
    let (base, state) = boot_server(test_settings()).await;
    let mut ws = connect(&format!("{base}/ws/chat/")).await;
    state.heartbeat.start().await;

    let heartbeat = read_json(&mut ws).await;

    assert_eq!(heartbeat["type"], "heartbeat");
    assert!(heartbeat["ts"].as_str().is_some_and(|ts| !ts.is_empty()));
    state.heartbeat.stop(Duration::from_secs(2)).await;
}

#[tokio::test]
async fn test_shutdown_sends_goodbye_and_going_away() {
    let (base, state) = boot_server(test_settings()).await;
    let mut ws = connect(&format!("{base}/ws/chat/?session_id=drain")).await;

    send_text(&mut ws, "before").await;
    assert_eq!(read_json(&mut ws).await["count"], 1);

    let shutdown = state.graceful_shutdown();
    let handle = tokio::spawn(async move { shutdown.execute("test").await });

    assert_eq!(
        read_json(&mut ws).await,
        json!({
            "bye": true,
            "total": 1,
            "reason": "server_shutdown",
            "inflight_completed": true
        })
    );
    assert_eq!(read_close_code(&mut ws).await, 1001);

    let result = timeout(TIMEOUT, handle).await.unwrap().unwrap();
    assert_eq!(result.clients_notified, 1);
    assert_eq!(result.remaining_connections, 0);
    assert!(state.health.is_shutting_down());
}

//! End-to-end tests for the WebSocket gateway
//!
//! Starts the relay on an ephemeral port and talks to it with a real
//! WebSocket client.

mod common;

use chatrelay::MessageLog;
use common::{serve, start_relay};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use wiremock::ResponseTemplate;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn connect(addr: SocketAddr) -> Client {
    let (mut client, _) = connect_async(format!("ws://{}/ws", addr))
        .await
        .expect("failed to connect");
    let greeting = next_frame(&mut client).await;
    assert_eq!(
        greeting,
        json!({"event": "connected", "data": {"message": "Socket connected successfully!"}})
    );
    client
}

async fn send(client: &mut Client, event: &str, data: Value) {
    let frame = json!({"event": event, "data": data}).to_string();
    client
        .send(Message::Text(frame))
        .await
        .expect("failed to send frame");
}

async fn next_frame(client: &mut Client) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for frame")
            .expect("connection closed")
            .expect("websocket error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).expect("frame is JSON");
        }
    }
}

#[tokio::test]
async fn test_message_round_trip_over_websocket() {
    let relay = start_relay(ResponseTemplate::new(200).set_body_json(json!({"answer": "hi"}))).await;
    let addr = serve(&relay).await;
    let mut client = connect(addr).await;

    send(&mut client, "message", json!({"user_id": 42, "message": "hello"})).await;

    let reply = next_frame(&mut client).await;
    assert_eq!(
        reply,
        json!({"event": "reply", "data": {"response": {"answer": "hi", "q_id": 1}}})
    );

    let record = relay.log.get(1).await.unwrap().expect("record persisted");
    assert_eq!(record.user_id, "42");
    assert!(record.is_answered());
    assert!(relay.state.sessions.is_active("42").await.unwrap());
}

#[tokio::test]
async fn test_join_then_reply_reaches_every_connection_of_user() {
    let relay = start_relay(ResponseTemplate::new(200).set_body_json(json!({"answer": "hi"}))).await;
    let addr = serve(&relay).await;
    let mut watcher = connect(addr).await;
    let mut sender = connect(addr).await;

    send(&mut watcher, "join", json!({"user_id": "42"})).await;
    assert_eq!(
        next_frame(&mut watcher).await,
        json!({"event": "joined", "data": {"message": "Joined room 42"}})
    );

    send(&mut sender, "message", json!({"user_id": "42", "message": "hello"})).await;

    let expected = json!({"event": "reply", "data": {"response": {"answer": "hi", "q_id": 1}}});
    assert_eq!(next_frame(&mut sender).await, expected);
    assert_eq!(next_frame(&mut watcher).await, expected);
}

#[tokio::test]
async fn test_invalid_message_reports_error_to_sender_only() {
    let relay = start_relay(ResponseTemplate::new(200).set_body_json(json!({}))).await;
    let addr = serve(&relay).await;
    let mut client = connect(addr).await;

    send(&mut client, "message", json!("just text")).await;

    assert_eq!(
        next_frame(&mut client).await,
        json!({"event": "error", "data": {"error": "Missing user_id or message"}})
    );
    assert!(relay.agent_requests().await.is_empty());
    assert!(relay.log.get(1).await.unwrap().is_none());
}

#[tokio::test]
async fn test_join_without_user_id_is_an_error() {
    let relay = start_relay(ResponseTemplate::new(200)).await;
    let addr = serve(&relay).await;
    let mut client = connect(addr).await;

    send(&mut client, "join", json!({})).await;

    assert_eq!(
        next_frame(&mut client).await,
        json!({"event": "error", "data": {"error": "user_id required"}})
    );
}

#[tokio::test]
async fn test_malformed_frame_is_reported() {
    let relay = start_relay(ResponseTemplate::new(200)).await;
    let addr = serve(&relay).await;
    let mut client = connect(addr).await;

    client
        .send(Message::Text("not a frame".to_string()))
        .await
        .expect("failed to send");

    assert_eq!(
        next_frame(&mut client).await,
        json!({"event": "error", "data": {"error": "Invalid frame"}})
    );
}

#[tokio::test]
async fn test_leave_ends_session() {
    let relay = start_relay(ResponseTemplate::new(200)).await;
    let addr = serve(&relay).await;
    let mut client = connect(addr).await;

    send(&mut client, "join", json!({"user_id": "42"})).await;
    next_frame(&mut client).await;
    assert!(relay.state.sessions.is_active("42").await.unwrap());

    send(&mut client, "leave", json!({"user_id": "42"})).await;
    assert_eq!(
        next_frame(&mut client).await,
        json!({"event": "left", "data": {"message": "Left room 42"}})
    );
    assert!(!relay.state.sessions.is_active("42").await.unwrap());
    assert_eq!(relay.state.channels.channel_size("42").await, 0);
}

#[tokio::test]
async fn test_disconnect_drops_channel_membership() {
    let relay = start_relay(ResponseTemplate::new(200)).await;
    let addr = serve(&relay).await;
    let mut client = connect(addr).await;

    send(&mut client, "join", json!({"user_id": "42"})).await;
    next_frame(&mut client).await;
    assert_eq!(relay.state.channels.channel_size("42").await, 1);

    client.close(None).await.expect("failed to close");
    drop(client);

    let mut remaining = 1;
    for _ in 0..50 {
        remaining = relay.state.channels.channel_size("42").await;
        if remaining == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(remaining, 0);
}

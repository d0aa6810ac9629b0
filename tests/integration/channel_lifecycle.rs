//! Integration tests for the realtime channel over real WebSocket servers:
//! handshake outcomes, malformed frames, and local versus remote close.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use recipechat::channel::ws::WsConnector;
use recipechat::channel::{ChannelEvent, ChannelState, Connector, EventCallback};
use recipechat::error::ChatError;
use recipechat_backend::server::{BackendState, start_server_with_state};
use recipechat_backend::store::BackendStore;
use recipechat_proto::credential::dev_token;
use recipechat_proto::room::RoomId;
use recipechat_proto::user::{Contact, UserId};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message as WsMessage;

fn recording() -> (EventCallback, Arc<Mutex<Vec<ChannelEvent>>>) {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    let callback: EventCallback = Arc::new(move |e| sink.lock().push(e));
    (callback, events)
}

fn delivered(events: &Mutex<Vec<ChannelEvent>>) -> Vec<String> {
    events
        .lock()
        .iter()
        .filter_map(|e| match e {
            ChannelEvent::Message(m) => Some(m.message.clone()),
            _ => None,
        })
        .collect()
}

async fn wait_until(cond: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not met within 5s");
}

/// A WebSocket server that accepts one connection, sends `frames`, then
/// optionally closes.
async fn scripted_server(frames: Vec<String>, close_after: bool) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        for frame in frames {
            ws.send(WsMessage::Text(frame.into())).await.unwrap();
        }
        if close_after {
            let _ = ws.close(None).await;
        } else {
            // Hold the connection open until the client leaves.
            while let Some(Ok(_)) = ws.next().await {}
        }
    });

    format!("ws://{addr}/ws")
}

/// Start the backend in-process with u1 and u2 sharing a room.
async fn start_backend() -> (String, Arc<BackendState>, RoomId) {
    let store = BackendStore::new(vec![Contact::new("u1", "ana"), Contact::new("u2", "bo")]);
    let state = Arc::new(BackendState::new(store));
    let room = state
        .store
        .get_or_create_room(&UserId::new("u1"), &UserId::new("u2"))
        .await
        .unwrap();
    let (addr, _handle) = start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .expect("failed to start backend");
    (format!("ws://{addr}/ws"), state, room)
}

// =============================================================================
// Handshake
// =============================================================================

#[tokio::test]
async fn send_before_open_is_rejected() {
    let (ws_url, _state, room) = start_backend().await;
    let connector = WsConnector::new(&ws_url, Duration::from_secs(5));
    let (callback, _) = recording();

    let handle = connector.open(&room, &dev_token("u1"), callback);
    assert_eq!(handle.state(), ChannelState::Connecting);
    assert!(matches!(handle.send("too early"), Err(ChatError::ChannelNotOpen)));

    assert_eq!(handle.wait_settled().await, ChannelState::Open);
    handle.send("on time").unwrap();
}

#[tokio::test]
async fn stalled_handshake_times_out() {
    // Accepts TCP but never answers the WebSocket upgrade.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (_stream, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;
    });

    let connector = WsConnector::new(&format!("ws://{addr}/ws"), Duration::from_millis(200));
    let (callback, events) = recording();
    let handle = connector.open(&RoomId::new("r"), &dev_token("u1"), callback);

    assert_eq!(handle.wait_settled().await, ChannelState::Error);
    assert!(matches!(handle.take_failure(), Some(ChatError::Timeout { .. })));
    assert!(matches!(events.lock()[0], ChannelEvent::Failed(_)));
}

#[tokio::test]
async fn outsider_cannot_join_room() {
    let (ws_url, state, room) = start_backend().await;
    state.store.add_user(Contact::new("u3", "cy")).await;
    let connector = WsConnector::new(&ws_url, Duration::from_secs(5));
    let (callback, _) = recording();

    let handle = connector.open(&room, &dev_token("u3"), callback);
    assert_eq!(handle.wait_settled().await, ChannelState::Error);
    assert!(matches!(handle.take_failure(), Some(ChatError::ChannelFailed(_))));
}

// =============================================================================
// Frames
// =============================================================================

#[tokio::test]
async fn malformed_frames_are_skipped() {
    let ws_url = scripted_server(
        vec![
            "not json".to_string(),
            r#"{"text":"wrong field"}"#.to_string(),
            r#"{"message":"no sender"}"#.to_string(),
            r#"{"message":"good","sender":"u2","timestamp":"2024-05-01T10:00:00Z"}"#.to_string(),
            r#"{"message":"stamped on arrival","sender":"u2"}"#.to_string(),
        ],
        false,
    )
    .await;
    let connector = WsConnector::new(&ws_url, Duration::from_secs(5));
    let (callback, events) = recording();
    let handle = connector.open(&RoomId::new("r"), &dev_token("u1"), callback);
    assert_eq!(handle.wait_settled().await, ChannelState::Open);

    wait_until(|| delivered(&events).len() == 2).await;
    assert_eq!(delivered(&events), ["good", "stamped on arrival"]);
    assert_eq!(handle.state(), ChannelState::Open);
}

#[tokio::test]
async fn frames_arrive_in_order() {
    let frames: Vec<String> = (0..20)
        .map(|i| format!(r#"{{"message":"step {i}","sender":"u2"}}"#))
        .collect();
    let ws_url = scripted_server(frames, false).await;
    let connector = WsConnector::new(&ws_url, Duration::from_secs(5));
    let (callback, events) = recording();
    let _handle = connector.open(&RoomId::new("r"), &dev_token("u1"), callback);

    wait_until(|| delivered(&events).len() == 20).await;
    let expected: Vec<String> = (0..20).map(|i| format!("step {i}")).collect();
    assert_eq!(delivered(&events), expected);
}

// =============================================================================
// Close
// =============================================================================

#[tokio::test]
async fn remote_close_is_reported_once() {
    let ws_url = scripted_server(
        vec![r#"{"message":"bye","sender":"u2"}"#.to_string()],
        true,
    )
    .await;
    let connector = WsConnector::new(&ws_url, Duration::from_secs(5));
    let (callback, events) = recording();
    let handle = connector.open(&RoomId::new("r"), &dev_token("u1"), callback);

    wait_until(|| handle.state() == ChannelState::Closed).await;
    let events = events.lock();
    assert_eq!(events.first(), Some(&ChannelEvent::Opened));
    assert_eq!(events.last(), Some(&ChannelEvent::Closed));
    assert_eq!(
        events.iter().filter(|e| **e == ChannelEvent::Closed).count(),
        1
    );
}

#[tokio::test]
async fn no_callbacks_after_local_close() {
    let (ws_url, state, room) = start_backend().await;
    let connector = WsConnector::new(&ws_url, Duration::from_secs(5));
    let (callback, events) = recording();
    let handle = connector.open(&room, &dev_token("u1"), callback);
    assert_eq!(handle.wait_settled().await, ChannelState::Open);

    handle.close();
    handle.close();
    assert_eq!(handle.state(), ChannelState::Closed);

    state
        .store
        .post(&room, &UserId::new("u2"), "after close".into())
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(*events.lock(), vec![ChannelEvent::Opened]);
    assert!(matches!(handle.send("hello?"), Err(ChatError::ChannelNotOpen)));
}

//! End-to-end: the `Realtime` facade against one in-process server that speaks the
//! admin WebSocket, the SSE stream and a REST endpoint.

mod common;

use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream::{self, StreamExt};
use futures::SinkExt;
use primus_realtime::config::set_api_base;
use primus_realtime::repositories::{KeyValueStore, MemoryStore};
use primus_realtime::{ConnectionStatus, InboundEvent, Realtime};
use serde_json::{json, Value};

use common::{eventually, fast_config, serve};

async fn admin_ws(ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(|socket: WebSocket| async move {
        let (mut sink, mut stream) = socket.split();
        // Wait for the auth frame before talking.
        while let Some(Ok(msg)) = stream.next().await {
            let Message::Text(text) = msg else { continue };
            let frame: Value = serde_json::from_str(&text).unwrap_or_default();
            if frame["event"] == "auth" && frame["payload"]["token"] == "tok" {
                break;
            }
        }
        for frame in [
            json!({"event": "auth.success", "payload": {}, "ts": 1}),
            json!({
                "event": "chat.message",
                "payload": {"message_id": 501, "client_id": 7, "client_name": "Bar 7",
                            "user_name": "lee", "text": "coffee please", "from": "client"},
                "ts": 1_700_000_100
            }),
        ] {
            if sink.send(Message::Text(frame.to_string())).await.is_err() {
                return;
            }
        }
        while let Some(Ok(_)) = stream.next().await {}
    })
}

async fn events() -> Sse<impl futures::Stream<Item = Result<Event, Infallible>>> {
    let first = stream::once(async {
        Ok::<_, Infallible>(
            Event::default()
                .id("42")
                .data(json!({"type": "payment.confirmed", "amount": 9}).to_string()),
        )
    });
    Sse::new(first.chain(stream::pending()))
}

async fn command(headers: HeaderMap, Json(body): Json<Value>) -> Response {
    if headers.get("authorization").and_then(|v| v.to_str().ok()) != Some("Bearer tok") {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    Json(json!({"queued": false, "action": body["action"]})).into_response()
}

async fn start() -> String {
    let app = Router::new()
        .route("/ws/admin", get(admin_ws))
        .route("/api/admin/events/stream", get(events))
        .route("/api/admin/pcs/7/command", post(command));
    format!("http://{}", serve(app).await)
}

#[tokio::test]
async fn realtime_wires_both_channels_and_notifications() {
    let api_base = start().await;
    let store = Arc::new(MemoryStore::new());
    let realtime = Realtime::new(&fast_config(&api_base), store.clone()).unwrap();
    realtime.credentials.save_token("tok").unwrap();

    let socket_events = Arc::new(Mutex::new(Vec::<InboundEvent>::new()));
    let stream_events = Arc::new(AtomicUsize::new(0));
    let bell_updates = Arc::new(AtomicUsize::new(0));
    {
        let socket_events = socket_events.clone();
        realtime
            .socket
            .subscribe(move |ev| socket_events.lock().unwrap().push(ev.clone()));
    }
    {
        let stream_events = stream_events.clone();
        realtime.stream.subscribe("payment.confirmed", move |ev| {
            assert_eq!(ev.payload["amount"], 9);
            stream_events.fetch_add(1, Ordering::SeqCst);
        });
    }
    {
        let bell_updates = bell_updates.clone();
        realtime.notifications.subscribe_notifications(move |_| {
            bell_updates.fetch_add(1, Ordering::SeqCst);
        });
    }
    let _bridge = realtime.connect();

    eventually("chat notification", || realtime.notifications.unread_count() == 1).await;
    eventually("sse event", || stream_events.load(Ordering::SeqCst) == 1).await;
    eventually("both open", || {
        let state = realtime.state();
        state.socket.status == ConnectionStatus::Open && state.stream.status == ConnectionStatus::Open
    })
    .await;

    let n = &realtime.notifications.notifications()[0];
    assert_eq!(n.id, "501");
    assert_eq!(n.client_id, Some(7));
    assert_eq!(n.client_name.as_deref(), Some("Bar 7"));
    assert_eq!(n.user_name.as_deref(), Some("lee"));
    assert_eq!(n.preview, "coffee please");
    assert_eq!(n.ts, 1_700_000_100);
    // Initial snapshot plus one change.
    assert_eq!(bell_updates.load(Ordering::SeqCst), 2);

    let topics: Vec<String> = socket_events.lock().unwrap().iter().map(|e| e.topic.clone()).collect();
    assert_eq!(topics, vec!["auth.success", "chat.message"]);
    assert_eq!(realtime.stream.last_event_id(), "42");

    realtime.notifications.mark_notifications_read_for_client(7);
    assert_eq!(realtime.notifications.unread_count(), 0);

    let reply = realtime
        .post("/api/admin/pcs/7/command", json!({"action": "unlock"}))
        .await
        .unwrap();
    assert_eq!(reply, Some(json!({"queued": false, "action": "unlock"})));

    realtime.disconnect();
    let state = realtime.state();
    assert_eq!(state.socket.status, ConnectionStatus::Disconnected);
    assert_eq!(state.stream.status, ConnectionStatus::Disconnected);
    assert_eq!(realtime.socket.subscriber_count(), 0);
}

#[tokio::test]
async fn stored_api_base_overrides_config() {
    let api_base = start().await;
    let store = Arc::new(MemoryStore::new());
    set_api_base(&*store, &format!("{api_base}/")).unwrap();

    let realtime = Realtime::new(&fast_config("http://127.0.0.1:9"), store.clone()).unwrap();
    assert_eq!(realtime.api_base, api_base);
    assert_eq!(realtime.socket.url(), api_base.replacen("http", "ws", 1) + "/ws/admin");
    assert_eq!(
        realtime.api_url("api/admin/pcs"),
        format!("{api_base}/api/admin/pcs")
    );
    assert!(store.get(primus_realtime::repositories::API_BASE_KEY).unwrap().is_some());
}

#[tokio::test]
async fn post_without_server_is_deferred() {
    let realtime = Realtime::new(&fast_config("http://127.0.0.1:9"), Arc::new(MemoryStore::new())).unwrap();
    realtime.credentials.save_token("tok").unwrap();

    let reply = realtime
        .post("/api/admin/pcs/7/command", json!({"action": "lock"}))
        .await
        .unwrap();
    assert_eq!(reply, None);
    let pending = realtime.queue.pending().unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].url, "http://127.0.0.1:9/api/admin/pcs/7/command");
    assert_eq!(pending[0].headers.get("Authorization").map(String::as_str), Some("Bearer tok"));
}

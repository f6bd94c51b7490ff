//! Offline write queue over real HTTP: immediate success, deferral on failure,
//! durable replay in order.

mod common;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use primus_realtime::repositories::{FileStore, KeyValueStore, MemoryStore};
use primus_realtime::services::notice::Notifier;
use primus_realtime::services::write_queue::{FLUSHED_NOTICE, QUEUED_NOTICE};
use primus_realtime::services::{FlushReport, HttpSender, WriteQueue};
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_test::{assert_err, assert_ok};

use common::{dead_addr, serve};

#[derive(Clone, Default)]
struct Backend {
    down: Arc<AtomicBool>,
    received: Arc<Mutex<Vec<Value>>>,
}

/// Accepts JSON bodies unless the backend is down or the body asks to fail.
async fn command(State(backend): State<Backend>, Json(body): Json<Value>) -> Response {
    if backend.down.load(Ordering::SeqCst) || body["fail"] == true {
        return StatusCode::SERVICE_UNAVAILABLE.into_response();
    }
    backend.received.lock().unwrap().push(body.clone());
    Json(json!({"ok": true, "echo": body})).into_response()
}

async fn plain() -> &'static str {
    "accepted"
}

async fn needs_auth(headers: HeaderMap) -> Response {
    match headers.get("authorization").and_then(|v| v.to_str().ok()) {
        Some("Bearer tok") => Json(json!({"authorized": true})).into_response(),
        _ => StatusCode::UNAUTHORIZED.into_response(),
    }
}

async fn start() -> (String, Backend) {
    let backend = Backend::default();
    let app = Router::new()
        .route("/api/admin/command", post(command))
        .route("/api/admin/plain", post(plain))
        .route("/api/admin/secure", post(needs_auth))
        .with_state(backend.clone());
    let addr = serve(app).await;
    (format!("http://{addr}"), backend)
}

/// Raw HTTP server that reads each request in full, answers `200 OK` promising a
/// 100-byte body, sends five bytes and hangs up.
async fn truncated_success_server() -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    tokio::spawn(async move {
        while let Ok((mut conn, _)) = listener.accept().await {
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            loop {
                let n = conn.read(&mut buf).await.unwrap_or(0);
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&request).to_lowercase();
                if let Some(end) = text.find("\r\n\r\n") {
                    let length = text
                        .lines()
                        .find_map(|l| l.strip_prefix("content-length:"))
                        .and_then(|v| v.trim().parse::<usize>().ok())
                        .unwrap_or(0);
                    if request.len() >= end + 4 + length {
                        break;
                    }
                }
            }
            counter.fetch_add(1, Ordering::SeqCst);
            let _ = conn
                .write_all(
                    b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\n\
                      Content-Length: 100\r\nConnection: close\r\n\r\n{\"ok\"",
                )
                .await;
            let _ = conn.shutdown().await;
        }
    });
    (format!("http://{addr}"), hits)
}

#[derive(Default)]
struct Notes(Mutex<Vec<String>>);

impl Notifier for Notes {
    fn notify(&self, message: &str) {
        self.0.lock().unwrap().push(message.to_string());
    }
}

impl Notes {
    fn all(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

fn queue(store: Arc<dyn KeyValueStore>, notes: Arc<Notes>) -> WriteQueue {
    WriteQueue::new(store, Arc::new(HttpSender::default()), notes)
}

#[tokio::test]
async fn success_returns_body_and_queues_nothing() {
    let (base, backend) = start().await;
    let notes = Arc::new(Notes::default());
    let q = queue(Arc::new(MemoryStore::new()), notes.clone());

    let body = assert_ok!(
        q.post_with_queue(
            &format!("{base}/api/admin/command"),
            json!({"pc_id": 3, "action": "lock"}),
            BTreeMap::new()
        )
        .await
    );
    assert_eq!(body.unwrap()["echo"]["action"], "lock");
    assert!(q.pending().unwrap().is_empty());
    assert!(notes.all().is_empty());
    assert_eq!(backend.received.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn non_json_success_body_reads_as_empty_object() {
    let (base, _backend) = start().await;
    let q = queue(Arc::new(MemoryStore::new()), Arc::new(Notes::default()));
    let body = q
        .post_with_queue(&format!("{base}/api/admin/plain"), json!({}), BTreeMap::new())
        .await
        .unwrap();
    assert_eq!(body, Some(json!({})));
}

#[tokio::test]
async fn truncated_body_after_success_is_not_queued() {
    let (base, hits) = truncated_success_server().await;
    let notes = Arc::new(Notes::default());
    let q = queue(Arc::new(MemoryStore::new()), notes.clone());

    let body = q
        .post_with_queue(&format!("{base}/api/admin/command"), json!({"n": 1}), BTreeMap::new())
        .await
        .unwrap();
    assert_eq!(body, Some(json!({})));
    assert!(q.pending().unwrap().is_empty());
    assert!(notes.all().is_empty());

    assert_eq!(q.flush_queue().await.unwrap(), FlushReport::default());
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn custom_headers_are_sent() {
    let (base, _backend) = start().await;
    let q = queue(Arc::new(MemoryStore::new()), Arc::new(Notes::default()));
    let url = format!("{base}/api/admin/secure");

    let mut headers = BTreeMap::new();
    headers.insert("Authorization".to_string(), "Bearer tok".to_string());
    let body = q.post_with_queue(&url, json!({}), headers).await.unwrap();
    assert_eq!(body, Some(json!({"authorized": true})));

    assert_eq!(q.post_with_queue(&url, json!({}), BTreeMap::new()).await.unwrap(), None);
    let pending = q.pending().unwrap();
    assert_eq!(pending.len(), 1);
    assert!(pending[0].headers.is_empty());
}

#[tokio::test]
async fn unreachable_server_defers_with_notice() {
    let addr = dead_addr().await;
    let notes = Arc::new(Notes::default());
    let q = queue(Arc::new(MemoryStore::new()), notes.clone());

    let result = q
        .post_with_queue(&format!("http://{addr}/api/admin/command"), json!({"n": 1}), BTreeMap::new())
        .await
        .unwrap();
    assert_eq!(result, None);
    assert_eq!(q.pending().unwrap()[0].data, json!({"n": 1}));
    assert_eq!(notes.all(), vec![QUEUED_NOTICE]);
}

#[tokio::test]
async fn queue_survives_restart_and_replays_in_order() {
    let (base, backend) = start().await;
    let url = format!("{base}/api/admin/command");
    let dir = tempfile::tempdir().unwrap();
    backend.down.store(true, Ordering::SeqCst);

    {
        let q = queue(Arc::new(FileStore::open(dir.path()).unwrap()), Arc::new(Notes::default()));
        for n in 1..=3 {
            let result = q
                .post_with_queue(&url, json!({"n": n, "fail": n == 2}), BTreeMap::new())
                .await
                .unwrap();
            assert_eq!(result, None);
        }
    }

    backend.down.store(false, Ordering::SeqCst);
    let notes = Arc::new(Notes::default());
    let q = queue(Arc::new(FileStore::open(dir.path()).unwrap()), notes.clone());
    assert_eq!(q.pending().unwrap().len(), 3);

    let report = q.flush_queue().await.unwrap();
    assert_eq!(report, FlushReport { sent: 2, remaining: 1 });
    let received: Vec<Value> = backend.received.lock().unwrap().iter().map(|b| b["n"].clone()).collect();
    assert_eq!(received, vec![json!(1), json!(3)]);
    let left = q.pending().unwrap();
    assert_eq!(left[0].data["n"], 2);
    assert!(notes.all().is_empty());
}

#[tokio::test]
async fn flush_announces_only_when_queue_empties() {
    let (base, backend) = start().await;
    let url = format!("{base}/api/admin/command");
    let notes = Arc::new(Notes::default());
    let q = queue(Arc::new(MemoryStore::new()), notes.clone());

    assert_eq!(q.flush_queue().await.unwrap(), FlushReport::default());
    assert!(notes.all().is_empty());

    backend.down.store(true, Ordering::SeqCst);
    q.post_with_queue(&url, json!({"n": 1}), BTreeMap::new()).await.unwrap();
    q.post_with_queue(&url, json!({"n": 2}), BTreeMap::new()).await.unwrap();
    assert_eq!(q.flush_queue().await.unwrap(), FlushReport { sent: 0, remaining: 2 });

    backend.down.store(false, Ordering::SeqCst);
    assert_eq!(q.flush_queue().await.unwrap(), FlushReport { sent: 2, remaining: 0 });
    assert!(q.pending().unwrap().is_empty());
    assert_eq!(notes.all(), vec![QUEUED_NOTICE, QUEUED_NOTICE, FLUSHED_NOTICE]);
}

#[tokio::test]
async fn unwritable_store_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::open(dir.path().join("store")).unwrap();
    std::fs::remove_dir_all(dir.path().join("store")).unwrap();
    std::fs::write(dir.path().join("store"), "not a directory").unwrap();

    let addr = dead_addr().await;
    let q = queue(Arc::new(store), Arc::new(Notes::default()));
    assert_err!(
        q.post_with_queue(&format!("http://{addr}/x"), json!({}), BTreeMap::new())
            .await
    );
}

//! Shared helpers: in-process axum servers and polling with a deadline.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use axum::Router;
use primus_realtime::Config;

/// Serve `app` on an ephemeral local port.
pub async fn serve(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local_addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    addr
}

/// A local address with nothing listening on it.
pub async fn dead_addr() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    listener.local_addr().expect("local_addr")
}

/// Poll `check` until it holds, failing the test after five seconds.
pub async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !check() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Config pointed at `api_base` with short retry delays.
pub fn fast_config(api_base: &str) -> Config {
    Config {
        api_base: api_base.to_string(),
        storage_dir: PathBuf::from(".primus-test"),
        token: None,
        ws_reconnect_interval: Duration::from_millis(30),
        ws_max_reconnect_attempts: 10,
        ws_heartbeat_interval: Duration::from_secs(30),
        ws_max_auth_failures: 3,
        sse_initial_backoff: Duration::from_millis(20),
        sse_max_backoff: Duration::from_millis(80),
        log_level: "debug".to_string(),
    }
}

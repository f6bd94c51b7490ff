//! Admin WebSocket: one authenticated duplex connection, every decoded frame fanned
//! out to all subscribers.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message};
use tracing::{debug, error, info, warn};

use crate::auth::CredentialProvider;
use crate::config::{websocket_url, SocketConfig};
use crate::error::AppError;
use crate::models::channel::{ConnectionState, ConnectionStatus};
use crate::models::event::{AdminEvent, ClientFrame, InboundEvent, AUTH_ERROR, AUTH_SUCCESS};
use crate::services::backoff::LinearBackoff;
use crate::services::shutdown_requested;
use crate::services::subscribers::{Subscribers, Subscription, Topic};

/// WebSocket channel to `/ws/admin`. Clones share one connection.
///
/// At most one socket exists at a time: `connect` is a no-op while a connection task
/// is alive, and `disconnect` invalidates it together with any pending reconnect.
#[derive(Clone)]
pub struct AdminSocket {
    inner: Arc<SocketInner>,
}

struct SocketInner {
    url: String,
    config: SocketConfig,
    credentials: Arc<dyn CredentialProvider>,
    subscribers: Subscribers<InboundEvent>,
    state: Mutex<SocketState>,
}

struct SocketState {
    status: ConnectionStatus,
    reconnect_attempt: u32,
    backoff_delay: Duration,
    auth_failures: u32,
    authenticated: bool,
    generation: u64,
    shutdown: Option<watch::Sender<bool>>,
}

/// Why a connection ended.
#[derive(Debug)]
enum SessionEnd {
    /// Local `disconnect()`.
    Shutdown,
    Closed(Option<u16>),
    AuthRejected,
    Failed(AppError),
}

impl AdminSocket {
    pub fn new(
        api_base: &str,
        config: SocketConfig,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self {
            inner: Arc::new(SocketInner {
                url: websocket_url(api_base),
                config,
                credentials,
                subscribers: Subscribers::new(),
                state: Mutex::new(SocketState {
                    status: ConnectionStatus::Disconnected,
                    reconnect_attempt: 0,
                    backoff_delay: Duration::ZERO,
                    auth_failures: 0,
                    authenticated: false,
                    generation: 0,
                    shutdown: None,
                }),
            }),
        }
    }

    /// Register `callback` for every inbound frame. The first subscriber triggers a
    /// connect when nothing is connected or connecting.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&InboundEvent) + Send + Sync + 'static,
    {
        let subscription = self.inner.subscribers.subscribe(Topic::Any, callback);
        self.connect();
        subscription
    }

    /// Start the connection task unless one is already running, with fresh retry
    /// counters. Without a stored credential this only logs a warning and does not
    /// retry. Must run inside a Tokio runtime.
    pub fn connect(&self) {
        let mut state = self.inner.state.lock();
        if state.shutdown.is_some() {
            debug!("ws already connecting or open");
            return;
        }
        if self.inner.credentials.bearer_token().is_none() {
            warn!("no bearer token, not connecting admin websocket");
            return;
        }

        let (tx, rx) = watch::channel(false);
        state.generation += 1;
        state.status = ConnectionStatus::Connecting;
        state.reconnect_attempt = 0;
        state.backoff_delay = Duration::ZERO;
        state.auth_failures = 0;
        state.shutdown = Some(tx);
        let generation = state.generation;
        drop(state);

        tokio::spawn(run(self.inner.clone(), generation, rx));
    }

    /// Close with a normal-closure code, drop all subscribers, reset counters and
    /// cancel any pending reconnect. Safe to call repeatedly.
    pub fn disconnect(&self) {
        {
            let mut state = self.inner.state.lock();
            if let Some(tx) = state.shutdown.take() {
                let _ = tx.send(true);
            }
            state.generation += 1;
            state.status = ConnectionStatus::Disconnected;
            state.reconnect_attempt = 0;
            state.backoff_delay = Duration::ZERO;
            state.auth_failures = 0;
            state.authenticated = false;
        }
        self.inner.subscribers.clear();
        debug!("ws disconnected");
    }

    pub fn state(&self) -> ConnectionState {
        let state = self.inner.state.lock();
        ConnectionState {
            status: state.status,
            reconnect_attempt: state.reconnect_attempt,
            backoff_delay: state.backoff_delay,
        }
    }

    /// Whether the server has acknowledged the auth frame on the current connection.
    pub fn is_authenticated(&self) -> bool {
        self.inner.state.lock().authenticated
    }

    pub fn url(&self) -> &str {
        &self.inner.url
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.len()
    }
}

impl SocketInner {
    fn update_if_current(&self, generation: u64, f: impl FnOnce(&mut SocketState)) -> bool {
        let mut state = self.state.lock();
        if state.generation != generation {
            return false;
        }
        f(&mut state);
        true
    }

    /// One connection lifetime.
    async fn session(
        &self,
        generation: u64,
        token: &str,
        shutdown: &mut watch::Receiver<bool>,
    ) -> SessionEnd {
        info!(url = %self.url, "ws connecting");
        let connected = tokio::select! {
            biased;
            _ = shutdown_requested(shutdown) => return SessionEnd::Shutdown,
            r = connect_async(self.url.as_str()) => r,
        };
        let (ws, _) = match connected {
            Ok(pair) => pair,
            Err(e) => return SessionEnd::Failed(e.into()),
        };
        let (mut sink, mut stream) = ws.split();

        self.update_if_current(generation, |s| {
            s.status = ConnectionStatus::Authenticating;
            s.reconnect_attempt = 0;
            s.authenticated = false;
        });
        info!("ws connected");

        if let Err(e) = sink.send(encode(&ClientFrame::auth(token))).await {
            return SessionEnd::Failed(e.into());
        }

        let period = self.config.heartbeat_interval;
        let mut heartbeat = interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown_requested(shutdown) => {
                    let _ = sink
                        .send(Message::Close(Some(CloseFrame {
                            code: CloseCode::Normal,
                            reason: "Normal closure".into(),
                        })))
                        .await;
                    return SessionEnd::Shutdown;
                }
                _ = heartbeat.tick() => {
                    if let Err(e) = sink.send(encode(&ClientFrame::heartbeat())).await {
                        return SessionEnd::Failed(e.into());
                    }
                }
                msg = stream.next() => match msg {
                    None => return SessionEnd::Closed(None),
                    Some(Err(e)) => return SessionEnd::Failed(e.into()),
                    Some(Ok(Message::Text(text))) => {
                        if let Some(end) = self.handle_text(generation, &text) {
                            let _ = sink.send(Message::Close(None)).await;
                            return end;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        return SessionEnd::Closed(frame.map(|f| u16::from(f.code)));
                    }
                    Some(Ok(_)) => {}
                },
            }
        }
    }

    /// Decode and fan out one text frame. Returns `Some` when the connection must end.
    fn handle_text(&self, generation: u64, text: &str) -> Option<SessionEnd> {
        let value: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(_) => {
                debug!("ignoring non-JSON ws frame");
                return None;
            }
        };
        let event = InboundEvent::from_ws_frame(value);

        match event.topic.as_str() {
            AUTH_SUCCESS => {
                self.update_if_current(generation, |s| {
                    s.authenticated = true;
                    s.auth_failures = 0;
                    s.status = ConnectionStatus::Open;
                });
                info!("ws authenticated");
            }
            AUTH_ERROR => {
                if let AdminEvent::AuthError { reason } = event.kind() {
                    error!(reason = %reason, "ws auth rejected");
                }
                return Some(SessionEnd::AuthRejected);
            }
            _ => {
                // Traffic past the auth frame means the server accepted it.
                self.update_if_current(generation, |s| {
                    if s.status == ConnectionStatus::Authenticating {
                        s.status = ConnectionStatus::Open;
                    }
                });
            }
        }

        self.subscribers.broadcast(&event);
        None
    }
}

async fn run(inner: Arc<SocketInner>, generation: u64, mut shutdown: watch::Receiver<bool>) {
    let backoff = LinearBackoff::new(
        inner.config.reconnect_interval,
        inner.config.max_reconnect_attempts,
    );

    loop {
        let Some(token) = inner.credentials.bearer_token() else {
            warn!("bearer token gone, admin websocket stopped");
            finish(&inner, generation, ConnectionStatus::Disconnected);
            return;
        };

        let end = inner.session(generation, &token, &mut shutdown).await;
        debug!(?end, "ws session ended");
        let auth_rejected = match end {
            SessionEnd::Shutdown => return,
            SessionEnd::Closed(code) => {
                info!(code = ?code, "ws connection closed");
                false
            }
            SessionEnd::Failed(e) => {
                error!(error = %e, "ws error");
                false
            }
            SessionEnd::AuthRejected => true,
        };

        let max_auth_failures = inner.config.max_auth_failures;
        let mut next = None;
        let mut gave_up_on_auth = false;
        let live = inner.update_if_current(generation, |s| {
            s.authenticated = false;
            if auth_rejected {
                s.auth_failures += 1;
                if max_auth_failures > 0 && s.auth_failures >= max_auth_failures {
                    gave_up_on_auth = true;
                    return;
                }
            }
            s.reconnect_attempt += 1;
            next = backoff.delay_for(s.reconnect_attempt);
            if let Some(delay) = next {
                s.backoff_delay = delay;
                s.status = ConnectionStatus::Connecting;
            }
        });
        if !live {
            return;
        }
        if gave_up_on_auth {
            error!(failures = max_auth_failures, "ws credential rejected repeatedly, giving up");
            finish(&inner, generation, ConnectionStatus::Closed);
            return;
        }
        let Some(delay) = next else {
            warn!("ws reconnect attempts exhausted");
            finish(&inner, generation, ConnectionStatus::Disconnected);
            return;
        };

        info!(
            attempt = inner.state.lock().reconnect_attempt,
            delay_ms = delay.as_millis() as u64,
            "ws reconnect scheduled"
        );
        tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown) => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

/// The task is exiting on its own; release the slot so a later `connect` can start over.
fn finish(inner: &SocketInner, generation: u64, status: ConnectionStatus) {
    inner.update_if_current(generation, |s| {
        s.status = status;
        s.shutdown = None;
    });
}

fn encode(frame: &ClientFrame) -> Message {
    // A derived Serialize over strings and integers cannot fail.
    Message::Text(serde_json::to_string(frame).unwrap_or_default())
}

//! SSE event stream: one-way push from the server, resumed from the persisted
//! last-event cursor after every reconnect.

use std::sync::Arc;

use parking_lot::Mutex;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use serde_json::Value;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::auth::CredentialProvider;
use crate::config::StreamConfig;
use crate::error::{AppError, AppResult};
use crate::models::channel::{ConnectionState, ConnectionStatus};
use crate::models::event::InboundEvent;
use crate::repositories::{KeyValueStore, LAST_EVENT_ID_KEY};
use crate::services::backoff::ExponentialBackoff;
use crate::services::shutdown_requested;
use crate::services::sse::{SseFrame, SseParser};
use crate::services::subscribers::{Subscribers, Subscription, Topic};

/// Cursor sent when nothing has been seen yet.
pub const INITIAL_CURSOR: &str = "0";

/// Resumable SSE channel. Clones share one connection.
///
/// Delivery is at-least-once across reconnects: the server replays from the cursor,
/// so handlers must tolerate duplicates.
#[derive(Clone)]
pub struct EventStream {
    inner: Arc<StreamInner>,
}

struct StreamInner {
    api_base: String,
    config: StreamConfig,
    client: reqwest::Client,
    credentials: Arc<dyn CredentialProvider>,
    store: Arc<dyn KeyValueStore>,
    handlers: Subscribers<InboundEvent>,
    state: Mutex<StreamState>,
}

struct StreamState {
    status: ConnectionStatus,
    backoff: ExponentialBackoff,
    backoff_delay: std::time::Duration,
    reconnect_attempt: u32,
    generation: u64,
    shutdown: Option<watch::Sender<bool>>,
}

impl EventStream {
    pub fn new(
        api_base: impl Into<String>,
        config: StreamConfig,
        client: reqwest::Client,
        credentials: Arc<dyn CredentialProvider>,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        let backoff = ExponentialBackoff::new(config.initial_backoff, config.max_backoff);
        Self {
            inner: Arc::new(StreamInner {
                api_base: api_base.into().trim_end_matches('/').to_string(),
                config,
                client,
                credentials,
                store,
                handlers: Subscribers::new(),
                state: Mutex::new(StreamState {
                    status: ConnectionStatus::Disconnected,
                    backoff,
                    backoff_delay: std::time::Duration::ZERO,
                    reconnect_attempt: 0,
                    generation: 0,
                    shutdown: None,
                }),
            }),
        }
    }

    /// Tear down any current stream and open a fresh one from the stored cursor.
    /// Without a stored credential this only logs a warning. Must run inside a Tokio
    /// runtime.
    pub fn connect(&self) {
        if self.inner.credentials.bearer_token().is_none() {
            self.stop(ConnectionStatus::Disconnected);
            warn!("no bearer token, not connecting event stream");
            return;
        }

        let (tx, rx) = watch::channel(false);
        let generation = {
            let mut state = self.inner.state.lock();
            if let Some(old) = state.shutdown.take() {
                let _ = old.send(true);
            }
            state.generation += 1;
            state.status = ConnectionStatus::Connecting;
            state.shutdown = Some(tx);
            state.generation
        };
        tokio::spawn(run(self.inner.clone(), generation, rx));
    }

    /// Close the stream. Handlers stay registered for the next `connect`.
    pub fn disconnect(&self) {
        self.stop(ConnectionStatus::Disconnected);
        debug!("event stream disconnected");
    }

    /// Register `handler` for events whose `type` is `topic`; `"*"` receives all.
    pub fn subscribe<F>(&self, topic: impl Into<Topic>, handler: F) -> Subscription
    where
        F: Fn(&InboundEvent) + Send + Sync + 'static,
    {
        self.inner.handlers.subscribe(topic, handler)
    }

    pub fn state(&self) -> ConnectionState {
        let state = self.inner.state.lock();
        ConnectionState {
            status: state.status,
            reconnect_attempt: state.reconnect_attempt,
            backoff_delay: state.backoff_delay,
        }
    }

    /// Persisted resume cursor.
    pub fn last_event_id(&self) -> String {
        self.inner.last_event_id()
    }

    fn stop(&self, status: ConnectionStatus) {
        let mut state = self.inner.state.lock();
        if let Some(tx) = state.shutdown.take() {
            let _ = tx.send(true);
        }
        state.generation += 1;
        state.status = status;
    }
}

impl StreamInner {
    fn last_event_id(&self) -> String {
        match self.store.get(LAST_EVENT_ID_KEY) {
            Ok(Some(id)) if !id.is_empty() => id,
            Ok(_) => INITIAL_CURSOR.to_string(),
            Err(e) => {
                warn!(error = %e, "failed to read resume cursor");
                INITIAL_CURSOR.to_string()
            }
        }
    }

    fn stream_url(&self, token: &str) -> AppResult<reqwest::Url> {
        let mut url = reqwest::Url::parse(&format!("{}/api/admin/events/stream", self.api_base))
            .map_err(|e| AppError::InvalidUrl(e.to_string()))?;
        url.query_pairs_mut()
            .append_pair("last_event_id", &self.last_event_id())
            .append_pair("token", token);
        Ok(url)
    }

    /// Apply `f` only while `generation` is still the live connection.
    fn update_if_current(&self, generation: u64, f: impl FnOnce(&mut StreamState)) -> bool {
        let mut state = self.state.lock();
        if state.generation != generation {
            return false;
        }
        f(&mut state);
        true
    }

    /// One stream lifetime: open, read until error or EOF.
    async fn stream_once(&self, generation: u64, token: &str) -> AppResult<()> {
        let url = self.stream_url(token)?;
        let mut res = self
            .client
            .get(url)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await?;
        let status = res.status();
        if !status.is_success() {
            return Err(AppError::Status(status.as_u16()));
        }

        self.update_if_current(generation, |s| {
            s.status = ConnectionStatus::Open;
            s.backoff.reset();
            s.reconnect_attempt = 0;
        });
        info!("sse connected");

        let mut parser = SseParser::new();
        while let Some(chunk) = res.chunk().await? {
            for frame in parser.feed(&chunk) {
                self.handle_frame(frame);
            }
        }
        Ok(())
    }

    fn handle_frame(&self, frame: SseFrame) {
        // Cursor first, so a failing handler cannot cause a replay of this frame.
        if let Some(id) = &frame.id {
            if let Err(e) = self.store.set(LAST_EVENT_ID_KEY, id) {
                error!(error = %e, id = %id, "failed to persist resume cursor");
            }
        }
        if !frame.is_message() {
            return;
        }
        let data: Value = match serde_json::from_str(&frame.data) {
            Ok(v) => v,
            Err(_) => {
                debug!("dropping non-JSON sse frame");
                return;
            }
        };
        let event = InboundEvent::from_sse_data(data, frame.id);
        self.handlers.dispatch(&event.topic, &event);
    }
}

async fn run(inner: Arc<StreamInner>, generation: u64, mut shutdown: watch::Receiver<bool>) {
    loop {
        let Some(token) = inner.credentials.bearer_token() else {
            warn!("bearer token gone, event stream stopped");
            inner.update_if_current(generation, |s| {
                s.status = ConnectionStatus::Disconnected;
                s.shutdown = None;
            });
            return;
        };

        let outcome = tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown) => return,
            r = inner.stream_once(generation, &token) => r,
        };
        match outcome {
            Ok(()) => info!("sse stream ended"),
            Err(e) => error!(error = %e, "sse error"),
        }

        let mut delay = inner.config.initial_backoff;
        let live = inner.update_if_current(generation, |s| {
            delay = s.backoff.next_delay();
            s.backoff_delay = delay;
            s.reconnect_attempt += 1;
            s.status = ConnectionStatus::Connecting;
        });
        if !live {
            return;
        }
        info!(delay_ms = delay.as_millis() as u64, "sse reconnect scheduled");

        tokio::select! {
            biased;
            _ = shutdown_requested(&mut shutdown) => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

//! Real-time layer of the Primus admin console.
//!
//! Two push channels (an authenticated WebSocket and a resumable SSE stream), an
//! offline write queue for mutations, and the notification store fed by chat traffic.

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod repositories;
pub mod services;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use models::{ConnectionState, ConnectionStatus, InboundEvent};
pub use services::{AdminSocket, EventStream, NotificationStore, Subscription, WriteQueue};

use std::sync::Arc;

use auth::StoredCredentials;
use repositories::KeyValueStore;
use services::{HttpSender, LogNotifier};

/// Both channel states at a glance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RealtimeState {
    pub socket: ConnectionState,
    pub stream: ConnectionState,
}

/// Everything the console needs at runtime, sharing one store and one HTTP client.
/// Used by main and by integration tests.
#[derive(Clone)]
pub struct Realtime {
    pub api_base: String,
    pub credentials: StoredCredentials,
    pub socket: AdminSocket,
    pub stream: EventStream,
    pub queue: WriteQueue,
    pub notifications: NotificationStore,
}

impl Realtime {
    pub fn new(config: &Config, store: Arc<dyn KeyValueStore>) -> AppResult<Self> {
        let api_base = config.effective_api_base(store.as_ref())?;
        let client = reqwest::Client::new();
        let credentials = StoredCredentials::new(store.clone());
        let provider: Arc<StoredCredentials> = Arc::new(credentials.clone());

        let socket = AdminSocket::new(&api_base, config.socket(), provider.clone());
        let stream = EventStream::new(
            api_base.clone(),
            config.stream(),
            client.clone(),
            provider,
            store.clone(),
        );
        let queue = WriteQueue::new(
            store,
            Arc::new(HttpSender::new(client)),
            Arc::new(LogNotifier),
        );

        Ok(Self {
            api_base,
            credentials,
            socket,
            stream,
            queue,
            notifications: NotificationStore::new(),
        })
    }

    /// Start both channels. Chat messages on the socket become notifications.
    pub fn connect(&self) -> Subscription {
        let bridge = handlers::bridge_chat_notifications(&self.socket, self.notifications.clone());
        self.stream.connect();
        bridge
    }

    /// Close both channels. Socket subscribers are dropped; stream handlers are kept.
    pub fn disconnect(&self) {
        self.socket.disconnect();
        self.stream.disconnect();
    }

    /// Absolute URL for an API path such as `/api/admin/pcs/3/command`.
    pub fn api_url(&self, path: &str) -> String {
        format!("{}/{}", self.api_base, path.trim_start_matches('/'))
    }

    /// Authenticated POST to an API path through the offline queue.
    pub async fn post(
        &self,
        path: &str,
        data: serde_json::Value,
    ) -> AppResult<Option<serde_json::Value>> {
        self.queue
            .post_with_queue(&self.api_url(path), data, self.credentials.auth_headers())
            .await
    }

    pub fn state(&self) -> RealtimeState {
        RealtimeState {
            socket: self.socket.state(),
            stream: self.stream.state(),
        }
    }
}

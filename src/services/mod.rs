//! Real-time services: WebSocket and SSE channels, offline write queue, notification store.

pub mod backoff;
pub mod event_stream;
pub mod notice;
pub mod notifications;
pub mod sse;
pub mod subscribers;
pub mod websocket;
pub mod write_queue;

pub use event_stream::EventStream;
pub use notice::{LogNotifier, Notifier};
pub use notifications::NotificationStore;
pub use subscribers::{Subscribers, Subscription, Topic};
pub use websocket::AdminSocket;
pub use write_queue::{FlushReport, HttpSender, MutationSender, WriteQueue};

use tokio::sync::watch;

/// Resolves once shutdown is signalled or the signalling side is gone.
pub(crate) async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

//! Process-wide list of chat notifications, newest first. Subscribers always get the
//! full list, never a delta.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::models::event::now_seconds;
use crate::models::notification::{NewNotification, Notification};
use crate::services::subscribers::{invoke_isolated, Subscribers, Subscription, Topic};

const TOPIC: &str = "notifications";

/// Observable notification list. Clones share state. Starts empty and lives as long
/// as any handle; notifications are only ever marked read, never removed.
#[derive(Clone, Default)]
pub struct NotificationStore {
    entries: Arc<Mutex<Vec<Notification>>>,
    listeners: Subscribers<Vec<Notification>>,
}

impl NotificationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Prepend a notification with defaults filled in and `read = false`.
    #[instrument(skip(self, entry), fields(client_id = ?entry.client_id))]
    pub fn add_notification(&self, entry: NewNotification) -> Notification {
        let notification = Notification {
            id: entry
                .id
                .filter(|id| !id.is_empty())
                .unwrap_or_else(|| Uuid::new_v4().simple().to_string()),
            kind: entry.kind.unwrap_or_else(|| "info".to_string()),
            client_id: entry.client_id,
            client_name: entry.client_name,
            user_name: entry.user_name,
            preview: entry.preview.unwrap_or_default(),
            ts: entry.ts.unwrap_or_else(now_seconds),
            read: false,
        };
        debug!(id = %notification.id, "notification added");
        self.update(|list| list.insert(0, notification.clone()));
        notification
    }

    /// Register `handler`; it runs right away with the current list, then after every
    /// change.
    pub fn subscribe_notifications<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&Vec<Notification>) + Send + Sync + 'static,
    {
        let handler = Arc::new(handler);
        let registered = handler.clone();
        let subscription = self
            .listeners
            .subscribe(Topic::Any, move |list: &Vec<Notification>| registered(list));
        invoke_isolated::<Vec<Notification>>(TOPIC, &*handler, &self.notifications());
        subscription
    }

    pub fn mark_notification_read(&self, id: &str) {
        self.update(|list| {
            for n in list.iter_mut().filter(|n| n.id == id) {
                n.read = true;
            }
        });
    }

    pub fn mark_notifications_read_for_client(&self, client_id: i64) {
        self.update(|list| {
            for n in list.iter_mut().filter(|n| n.client_id == Some(client_id)) {
                n.read = true;
            }
        });
    }

    /// Snapshot, newest first.
    pub fn notifications(&self) -> Vec<Notification> {
        self.entries.lock().clone()
    }

    pub fn unread_count(&self) -> usize {
        self.entries.lock().iter().filter(|n| !n.read).count()
    }

    fn update(&self, mutate: impl FnOnce(&mut Vec<Notification>)) {
        let snapshot = {
            let mut entries = self.entries.lock();
            mutate(&mut entries);
            entries.clone()
        };
        self.listeners.broadcast(&snapshot);
    }
}

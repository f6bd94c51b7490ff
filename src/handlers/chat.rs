//! Chat traffic from the admin socket into the notification store.

use tracing::debug;

use crate::models::event::{now_seconds, AdminEvent, ChatMessage, InboundEvent};
use crate::models::notification::{NewNotification, Notification};
use crate::services::{AdminSocket, NotificationStore, Subscription};

/// Notification type used for chat messages.
pub const CHAT_KIND: &str = "chat";

/// Turn every non-empty `chat.message` on `socket` into a notification.
pub fn bridge_chat_notifications(socket: &AdminSocket, store: NotificationStore) -> Subscription {
    socket.subscribe(move |event| {
        if let Some(notification) = chat_notification(event) {
            store.add_notification(notification);
        }
    })
}

/// Notification for a chat event, or `None` for other topics and empty messages.
pub fn chat_notification(event: &InboundEvent) -> Option<NewNotification> {
    let AdminEvent::ChatMessage(msg) = event.kind() else {
        return None;
    };
    if msg.text.is_empty() {
        debug!("skipping empty chat message");
        return None;
    }
    let client_id = msg.client();
    Some(NewNotification {
        id: msg.id.clone(),
        kind: Some(CHAT_KIND.to_string()),
        client_id,
        client_name: Some(
            msg.client_name
                .clone()
                .unwrap_or_else(|| {
                    format!("PC-{}", client_id.map(|id| id.to_string()).unwrap_or_default())
                }),
        ),
        user_name: Some(msg.user_name.clone().unwrap_or_else(|| "Guest".to_string())),
        ts: Some(event.server_timestamp.or(msg.ts).unwrap_or_else(now_seconds)),
        preview: Some(msg.text),
    })
}

/// Messages belonging to the thread open on `pc_id`, in arrival order.
pub fn thread_for<'a>(
    messages: impl IntoIterator<Item = &'a ChatMessage>,
    pc_id: i64,
) -> Vec<&'a ChatMessage> {
    messages.into_iter().filter(|m| m.concerns(pc_id)).collect()
}

/// Unread chat notifications for one PC.
pub fn unread_for_client(notifications: &[Notification], client_id: i64) -> usize {
    notifications
        .iter()
        .filter(|n| n.kind == CHAT_KIND && !n.read && n.client_id == Some(client_id))
        .count()
}

//! Chat notifications shown in the admin notification bell.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub client_id: Option<i64>,
    pub client_name: Option<String>,
    pub user_name: Option<String>,
    pub preview: String,
    /// Epoch seconds.
    pub ts: i64,
    pub read: bool,
}

/// Input to `NotificationStore::add_notification`; unset fields get defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewNotification {
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub client_id: Option<i64>,
    pub client_name: Option<String>,
    pub user_name: Option<String>,
    pub preview: Option<String>,
    pub ts: Option<i64>,
}

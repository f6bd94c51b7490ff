//! Wire frames and inbound events for the WebSocket and SSE channels.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Topic of the server's auth acknowledgement.
pub const AUTH_SUCCESS: &str = "auth.success";
/// Topic of the server's auth rejection; payload `{reason}`.
pub const AUTH_ERROR: &str = "auth.error";
pub const CHAT_MESSAGE: &str = "chat.message";
pub const PC_STATUS: &str = "pc.status";
pub const COMMAND_ACK: &str = "command.ack";
pub const SHOP_PURCHASE: &str = "shop.purchase";
pub const PAYMENT_CONFIRMED: &str = "payment.confirmed";

/// Event decoded from either channel. Passed by reference to every matching subscriber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundEvent {
    pub topic: String,
    pub payload: Value,
    /// Server time in epoch seconds, when the frame carried one.
    pub server_timestamp: Option<i64>,
    /// SSE event id; WebSocket frames have none.
    pub id: Option<String>,
}

impl InboundEvent {
    /// WebSocket frame `{"event": .., "payload": .., "ts": ..}`. JSON that is not an
    /// object is kept whole as the payload of an empty topic.
    pub fn from_ws_frame(frame: Value) -> Self {
        match frame {
            Value::Object(mut obj) => {
                let topic = obj
                    .get("event")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let server_timestamp = obj.get("ts").and_then(epoch_seconds);
                let payload = obj.remove("payload").unwrap_or(Value::Null);
                Self {
                    topic,
                    payload,
                    server_timestamp,
                    id: None,
                }
            }
            other => Self {
                topic: String::new(),
                payload: other,
                server_timestamp: None,
                id: None,
            },
        }
    }

    /// SSE `data` object `{"type": .., ...}`; the whole object is the payload.
    pub fn from_sse_data(data: Value, id: Option<String>) -> Self {
        let topic = data
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let server_timestamp = data.get("ts").and_then(epoch_seconds);
        Self {
            topic,
            payload: data,
            server_timestamp,
            id,
        }
    }

    /// Typed view of this event.
    pub fn kind(&self) -> AdminEvent {
        AdminEvent::from_event(self)
    }
}

/// Recognized topics, with a fallback for everything else.
#[derive(Debug, Clone, PartialEq)]
pub enum AdminEvent {
    AuthSuccess,
    AuthError { reason: String },
    ChatMessage(ChatMessage),
    PcStatus(Value),
    CommandAck(Value),
    ShopPurchase(Value),
    PaymentConfirmed(Value),
    Unknown { topic: String, payload: Value },
}

impl AdminEvent {
    pub fn from_event(event: &InboundEvent) -> Self {
        match event.topic.as_str() {
            AUTH_SUCCESS => AdminEvent::AuthSuccess,
            AUTH_ERROR => AdminEvent::AuthError {
                reason: event
                    .payload
                    .get("reason")
                    .and_then(Value::as_str)
                    .unwrap_or("unauthorized")
                    .to_string(),
            },
            CHAT_MESSAGE => AdminEvent::ChatMessage(ChatMessage::from_payload(&event.payload)),
            PC_STATUS => AdminEvent::PcStatus(event.payload.clone()),
            COMMAND_ACK => AdminEvent::CommandAck(event.payload.clone()),
            SHOP_PURCHASE => AdminEvent::ShopPurchase(event.payload.clone()),
            PAYMENT_CONFIRMED => AdminEvent::PaymentConfirmed(event.payload.clone()),
            other => AdminEvent::Unknown {
                topic: other.to_string(),
                payload: event.payload.clone(),
            },
        }
    }
}

/// Payload of a `chat.message` event. The server has used several field names over
/// time, so the accessors fall back between them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatMessage {
    /// `message_id`, else `id`.
    pub id: Option<String>,
    pub client_id: Option<i64>,
    pub pc_id: Option<i64>,
    pub client_name: Option<String>,
    pub user_name: Option<String>,
    /// `text`, else `message`; empty when neither is present.
    pub text: String,
    /// `client` or `admin`.
    pub from: Option<String>,
    pub from_user_id: Option<i64>,
    pub to_user_id: Option<i64>,
    pub ts: Option<i64>,
}

impl ChatMessage {
    pub fn from_payload(payload: &Value) -> Self {
        let text = |key: &str| payload.get(key).and_then(non_empty_str);
        Self {
            id: payload
                .get("message_id")
                .and_then(id_string)
                .or_else(|| payload.get("id").and_then(id_string)),
            client_id: payload.get("client_id").and_then(integer),
            pc_id: payload.get("pc_id").and_then(integer),
            client_name: text("client_name"),
            user_name: text("user_name"),
            text: text("text").or_else(|| text("message")).unwrap_or_default(),
            from: text("from"),
            from_user_id: payload.get("from_user_id").and_then(integer),
            to_user_id: payload.get("to_user_id").and_then(integer),
            ts: payload.get("ts").and_then(epoch_seconds),
        }
    }

    /// The PC this message belongs to.
    pub fn client(&self) -> Option<i64> {
        self.client_id.or(self.pc_id)
    }

    /// Whether a chat thread open on `pc_id` should show this message.
    pub fn concerns(&self, pc_id: i64) -> bool {
        self.client_id == Some(pc_id) || self.pc_id == Some(pc_id)
    }

    pub fn is_from_client(&self) -> bool {
        self.from.as_deref() == Some("client")
    }
}

/// Frames the client sends on the admin WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum ClientFrame {
    /// Must be the first frame after the transport opens.
    #[serde(rename = "auth")]
    Auth { payload: AuthPayload, ts: i64 },
    #[serde(rename = "heartbeat")]
    Heartbeat { ts: i64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthPayload {
    pub token: String,
}

impl ClientFrame {
    pub fn auth(token: impl Into<String>) -> Self {
        ClientFrame::Auth {
            payload: AuthPayload {
                token: token.into(),
            },
            ts: now_seconds(),
        }
    }

    pub fn heartbeat() -> Self {
        ClientFrame::Heartbeat { ts: now_seconds() }
    }
}

/// Current time in epoch seconds.
pub fn now_seconds() -> i64 {
    chrono::Utc::now().timestamp()
}

fn epoch_seconds(v: &Value) -> Option<i64> {
    v.as_i64().or_else(|| v.as_f64().map(|f| f.floor() as i64))
}

fn integer(v: &Value) -> Option<i64> {
    v.as_i64()
        .or_else(|| v.as_str().and_then(|s| s.trim().parse().ok()))
}

fn id_string(v: &Value) -> Option<String> {
    match v {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn non_empty_str(v: &Value) -> Option<String> {
    v.as_str().filter(|s| !s.is_empty()).map(String::from)
}

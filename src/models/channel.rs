//! Connection state shared by both channel types.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Lifecycle of a channel's transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// No transport and nothing scheduled.
    Disconnected,
    /// Opening a transport, or waiting out a reconnect delay.
    Connecting,
    /// Transport open, auth frame sent, no answer yet (WebSocket only).
    Authenticating,
    Open,
    /// Gave up for good; only an explicit connect revives the channel.
    Closed,
}

/// Snapshot of a channel's connection bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    pub reconnect_attempt: u32,
    /// Delay of the most recently scheduled reconnect.
    pub backoff_delay: Duration,
}

impl ConnectionState {
    pub fn disconnected() -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            reconnect_attempt: 0,
            backoff_delay: Duration::ZERO,
        }
    }
}

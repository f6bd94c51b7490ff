//! Data models for events, connection state, notifications, and queued mutations.

pub mod channel;
pub mod event;
pub mod notification;
pub mod queue;

pub use channel::*;
pub use event::*;
pub use notification::*;
pub use queue::*;

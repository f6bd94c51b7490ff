//! Event handlers wiring channel traffic into application state.

pub mod chat;

pub use chat::*;

//! Persistence: durable key-value storage shared across restarts.

mod kv_store;

pub use kv_store::*;

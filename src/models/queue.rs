//! Mutations waiting in the offline write queue.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// A POST that failed and will be replayed. Persisted as `{url, data, headers}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedMutation {
    pub url: String,
    pub data: serde_json::Value,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

impl QueuedMutation {
    pub fn new(
        url: impl Into<String>,
        data: serde_json::Value,
        headers: BTreeMap<String, String>,
    ) -> Self {
        Self {
            url: url.into(),
            data,
            headers,
        }
    }
}

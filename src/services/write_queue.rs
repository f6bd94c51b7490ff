//! Offline write queue: POSTs that fail are persisted and replayed on the next flush.
//! The persisted queue is the source of truth; nothing is cached in memory.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use serde_json::{json, Value};
use tracing::{debug, info, instrument, warn};

use crate::error::{AppError, AppResult};
use crate::models::queue::QueuedMutation;
use crate::repositories::{KeyValueStore, OFFLINE_QUEUE_KEY};
use crate::services::notice::Notifier;

pub const QUEUED_NOTICE: &str = "Action queued (offline). Will retry when online.";
pub const FLUSHED_NOTICE: &str = "All queued actions sent.";

/// Delivers one mutation. Any `Err` (network failure or non-2xx) keeps it queued.
#[async_trait]
pub trait MutationSender: Send + Sync {
    /// Returns the decoded JSON response body, or `{}` when the body is not JSON.
    async fn send(&self, mutation: &QueuedMutation) -> AppResult<Value>;
}

/// `MutationSender` over reqwest.
#[derive(Clone, Default)]
pub struct HttpSender {
    client: reqwest::Client,
}

impl HttpSender {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MutationSender for HttpSender {
    async fn send(&self, mutation: &QueuedMutation) -> AppResult<Value> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        for (name, value) in &mutation.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| AppError::Internal(anyhow::anyhow!("header {name}: {e}")))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| AppError::Internal(anyhow::anyhow!("header {name}: {e}")))?;
            headers.insert(name, value);
        }

        let res = self
            .client
            .post(&mutation.url)
            .headers(headers)
            .body(serde_json::to_vec(&mutation.data)?)
            .send()
            .await?;
        let status = res.status();
        if !status.is_success() {
            return Err(AppError::Status(status.as_u16()));
        }
        // Accepted from here on; an unreadable body reads like a non-JSON one.
        let body = match res.bytes().await {
            Ok(body) => body,
            Err(e) => {
                warn!(url = %mutation.url, error = %e, "response body unreadable after success");
                Default::default()
            }
        };
        Ok(serde_json::from_slice(&body).unwrap_or_else(|_| json!({})))
    }
}

/// Outcome of one `flush_queue` pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub sent: usize,
    pub remaining: usize,
}

/// Run at most one `flush_queue` at a time per store; concurrent flushes can send an
/// entry twice.
#[derive(Clone)]
pub struct WriteQueue {
    store: Arc<dyn KeyValueStore>,
    sender: Arc<dyn MutationSender>,
    notifier: Arc<dyn Notifier>,
}

impl WriteQueue {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        sender: Arc<dyn MutationSender>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            store,
            sender,
            notifier,
        }
    }

    /// POST now. `Ok(Some(body))` on success; `Ok(None)` means the request failed and
    /// was queued for a later flush ("accepted but deferred"). `Err` when the queue
    /// could not be persisted, or when the request can never succeed (a malformed
    /// header, say) and is not queued.
    pub async fn post_with_queue(
        &self,
        url: &str,
        data: Value,
        headers: BTreeMap<String, String>,
    ) -> AppResult<Option<Value>> {
        let mutation = QueuedMutation::new(url, data, headers);
        match self.sender.send(&mutation).await {
            Ok(body) => Ok(Some(body)),
            Err(e) if !e.is_transient() => {
                warn!(url = %url, error = %e, "post rejected, not queueing");
                Err(e)
            }
            Err(e) => {
                warn!(url = %url, error = %e, "post failed, queueing");
                let mut queue = self.pending()?;
                queue.push(mutation);
                self.persist(&queue)?;
                self.notifier.notify(QUEUED_NOTICE);
                Ok(None)
            }
        }
    }

    /// Try every queued mutation once, oldest first. Failures stay queued in their
    /// original order; successes are dropped. Announces only the transition to empty.
    #[instrument(skip(self))]
    pub async fn flush_queue(&self) -> AppResult<FlushReport> {
        let snapshot = self.pending()?;
        if snapshot.is_empty() {
            return Ok(FlushReport::default());
        }

        let mut still_failing = Vec::new();
        let mut sent = 0;
        for mutation in &snapshot {
            match self.sender.send(mutation).await {
                Ok(_) => sent += 1,
                Err(e) => {
                    debug!(url = %mutation.url, error = %e, "replay failed");
                    still_failing.push(mutation.clone());
                }
            }
        }

        // Anything queued while this pass was sending goes after the survivors.
        let current = self.pending()?;
        if current.len() > snapshot.len() && current.starts_with(&snapshot) {
            still_failing.extend_from_slice(&current[snapshot.len()..]);
        }

        self.persist(&still_failing)?;
        let report = FlushReport {
            sent,
            remaining: still_failing.len(),
        };
        info!(sent = report.sent, remaining = report.remaining, "queue flushed");
        if report.remaining == 0 {
            self.notifier.notify(FLUSHED_NOTICE);
        }
        Ok(report)
    }

    /// Queued mutations as persisted, oldest first. An unreadable queue is treated as
    /// empty.
    pub fn pending(&self) -> AppResult<Vec<QueuedMutation>> {
        let Some(raw) = self.store.get(OFFLINE_QUEUE_KEY)? else {
            return Ok(Vec::new());
        };
        match serde_json::from_str(&raw) {
            Ok(queue) => Ok(queue),
            Err(e) => {
                warn!(error = %e, "offline queue is corrupt, starting empty");
                Ok(Vec::new())
            }
        }
    }

    fn persist(&self, queue: &[QueuedMutation]) -> AppResult<()> {
        self.store
            .set(OFFLINE_QUEUE_KEY, &serde_json::to_string(queue)?)
    }
}

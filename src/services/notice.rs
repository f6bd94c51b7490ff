//! Operator-facing notices ("queued", "sent"). Unobtrusive; never blocking.

use tracing::info;

pub trait Notifier: Send + Sync {
    fn notify(&self, message: &str);
}

/// Writes notices to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, message: &str) {
        info!(notice = %message, "notice");
    }
}

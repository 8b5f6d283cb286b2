//! A transport that logs notifications instead of sending them.
//!
//! Useful for dry runs and for validating the alert pipeline end to end
//! without a push service account.

use crate::core::{DeliveryError, PushTransport};
use crate::notification::Notification;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

#[derive(Debug, Default)]
pub struct LoggingTransport {
    sent: AtomicU64,
}

impl LoggingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of notifications logged so far.
    pub fn sent_count(&self) -> u64 {
        self.sent.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PushTransport for LoggingTransport {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, token: &str, notification: &Notification) -> Result<(), DeliveryError> {
        self.sent.fetch_add(1, Ordering::SeqCst);
        info!(
            token = %token,
            title = %notification.title,
            body = %notification.body,
            data = ?notification.data,
            "Push notification (dry run)"
        );
        Ok(())
    }
}

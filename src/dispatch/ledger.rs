// Per-subscriber claims that enforce the cooldown window across batches.

use chrono::{DateTime, Utc};
use moka::future::Cache;
use moka::ops::compute::{CompResult, Op};
use std::future;
use std::time::Duration;

const MIN_WINDOW: Duration = Duration::from_millis(1);

/// Remembers which subscribers were (or are being) notified in the current
/// cooldown window.
///
/// A claim is taken atomically before the first send to a subscriber and is
/// stamped with the time of the alert that took it. A later alert may take
/// the claim over once its own time is a full window past that stamp. The
/// cache TTL (twice the window) only evicts claims nobody asks about anymore.
pub struct NotificationLedger {
    claims: Cache<String, DateTime<Utc>>,
    window: Duration,
}

impl NotificationLedger {
    /// Creates a new `NotificationLedger`.
    ///
    /// # Arguments
    /// * `window` - How long a claim blocks further deliveries.
    /// * `max_capacity` - The maximum number of subscribers tracked at once.
    pub fn new(window: Duration, max_capacity: u64) -> Self {
        let claims = Cache::builder()
            .time_to_live(window.saturating_mul(2).max(MIN_WINDOW))
            .max_capacity(max_capacity)
            .build();
        Self { claims, window }
    }

    /// Claims the subscriber for the window starting at `at`.
    ///
    /// # Returns
    /// * `true` if the caller now owns the delivery for this subscriber.
    /// * `false` if another delivery already holds the window.
    pub async fn try_claim(&self, subscriber_id: &str, at: DateTime<Utc>) -> bool {
        let window = self.window;
        let result = self
            .claims
            .entry_by_ref(subscriber_id)
            .and_compute_with(|current| {
                let op = match current {
                    Some(entry) if !window_elapsed(*entry.value(), at, window) => Op::Nop,
                    _ => Op::Put(at),
                };
                future::ready(op)
            })
            .await;
        matches!(result, CompResult::Inserted(_) | CompResult::ReplacedWith(_))
    }

    /// Gives the window back after a failed delivery.
    pub async fn release(&self, subscriber_id: &str) {
        self.claims.invalidate(subscriber_id).await;
    }
}

fn window_elapsed(claimed_at: DateTime<Utc>, at: DateTime<Utc>, window: Duration) -> bool {
    (at - claimed_at).to_std().is_ok_and(|elapsed| elapsed >= window)
}

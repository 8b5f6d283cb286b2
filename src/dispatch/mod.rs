//! Concurrent fan-out of one alert to every subscriber.
//!
//! `DispatchEngine::dispatch` spawns one delivery job per subscriber. Jobs
//! share a semaphore that bounds the number of in-flight sends, retry
//! transient failures with exponential backoff and stop at the first
//! permanent failure. The batch waits for every job or for the batch
//! deadline, whichever comes first. Jobs still running at the deadline are
//! reported as timed out and told to stop retrying; a send already on the
//! wire is left to finish on its own and its result is ignored.

pub mod ledger;

use crate::core::{
    AlertEvent, DeliveryBatchResult, DeliveryError, DeliveryErrorKind, DeliveryOutcome,
    PushTransport, Subscriber,
};
use crate::notification::Notification;
use crate::registry::SubscriberRegistry;
use crate::reporter::DeliveryReporter;
use chrono::{DateTime, Utc};
use rand::Rng;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, instrument, warn};

pub use ledger::NotificationLedger;

const LEDGER_CAPACITY: u64 = 100_000;
/// Used when the configured batch timeout does not fit the clock.
const FALLBACK_BATCH_TIMEOUT: Duration = Duration::from_secs(24 * 60 * 60);

/// Tuning for delivery attempts and batches.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchSettings {
    /// Total send attempts per subscriber, including the first
    pub max_attempts: u32,
    /// Delay before the first retry; doubled after every retry
    pub initial_backoff: Duration,
    /// Upper bound for a single backoff delay
    pub max_backoff: Duration,
    /// Maximum number of sends in flight at once
    pub max_concurrency: usize,
    /// Deadline for the whole batch
    pub batch_timeout: Duration,
    /// Minimum time between two deliveries to the same subscriber
    pub cooldown: Duration,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            max_concurrency: 16,
            batch_timeout: Duration::from_secs(30),
            cooldown: crate::debounce::DEFAULT_COOLDOWN,
        }
    }
}

/// Delivers alert notifications to subscriber snapshots.
pub struct DispatchEngine {
    transport: Arc<dyn PushTransport>,
    registry: Arc<SubscriberRegistry>,
    settings: DispatchSettings,
    ledger: NotificationLedger,
}

impl DispatchEngine {
    pub fn new(
        transport: Arc<dyn PushTransport>,
        registry: Arc<SubscriberRegistry>,
        settings: DispatchSettings,
    ) -> Self {
        let ledger = NotificationLedger::new(settings.cooldown, LEDGER_CAPACITY);
        Self {
            transport,
            registry,
            settings,
            ledger,
        }
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    /// Delivers `event` to every subscriber in `subscribers`.
    ///
    /// Subscribers already notified within the cooldown window are skipped
    /// and counted as suppressed. Successful deliveries update the
    /// subscriber's `last_notified_at` in the registry.
    #[instrument(skip_all, fields(transport = self.transport.name(), subscribers = subscribers.len()))]
    pub async fn dispatch(&self, event: &AlertEvent, subscribers: Vec<Subscriber>) -> DeliveryBatchResult {
        let started = Instant::now();
        let deadline = started
            .checked_add(self.settings.batch_timeout)
            .unwrap_or(started + FALLBACK_BATCH_TIMEOUT);
        let notification = Arc::new(Notification::gas_leak(&event.current));
        let semaphore = Arc::new(Semaphore::new(self.settings.max_concurrency.max(1)));
        let (cancel_tx, cancel_rx) = watch::channel(false);
        // Unbounded so a job finishing after the deadline never blocks.
        let (outcome_tx, mut outcome_rx) = mpsc::unbounded_channel();

        let mut pending: HashMap<String, Arc<AtomicU32>> = HashMap::new();
        let mut suppressed = 0;

        for subscriber in subscribers {
            if pending.contains_key(&subscriber.id) {
                continue;
            }
            if self.notified_within_window(&subscriber, event.triggered_at)
                || !self.ledger.try_claim(&subscriber.id, event.triggered_at).await
            {
                debug!(subscriber_id = %subscriber.id, "Already notified in this cooldown window, skipping.");
                suppressed += 1;
                continue;
            }

            let attempts = Arc::new(AtomicU32::new(0));
            pending.insert(subscriber.id.clone(), attempts.clone());

            let job = DeliveryJob {
                transport: self.transport.clone(),
                notification: notification.clone(),
                subscriber,
                max_attempts: self.settings.max_attempts.max(1),
                initial_backoff: self.settings.initial_backoff,
                max_backoff: self.settings.max_backoff,
                attempts,
                semaphore: semaphore.clone(),
                cancel_rx: cancel_rx.clone(),
            };
            let outcome_tx = outcome_tx.clone();
            tokio::spawn(async move {
                let outcome = job.run().await;
                // The batch may already be closed.
                let _ = outcome_tx.send(outcome);
            });
        }
        drop(outcome_tx);

        let mut outcomes = Vec::with_capacity(pending.len());
        let batch_deadline = tokio::time::sleep_until(deadline);
        tokio::pin!(batch_deadline);

        while !pending.is_empty() {
            tokio::select! {
                biased;
                received = outcome_rx.recv() => {
                    let Some(outcome) = received else { break };
                    if pending.remove(&outcome.subscriber_id).is_some() {
                        self.settle(&outcome, event.triggered_at).await;
                        outcomes.push(outcome);
                    }
                }
                _ = &mut batch_deadline => {
                    warn!(
                        unfinished = pending.len(),
                        timeout_ms = self.settings.batch_timeout.as_millis() as u64,
                        "Dispatch batch deadline reached."
                    );
                    break;
                }
            }
        }

        // Stops retries and queued jobs; sends already on the wire finish on their own.
        let _ = cancel_tx.send(true);
        for (subscriber_id, attempts) in pending.drain() {
            self.ledger.release(&subscriber_id).await;
            outcomes.push(DeliveryOutcome::failed(
                subscriber_id,
                attempts.load(Ordering::SeqCst),
                DeliveryErrorKind::Timeout,
            ));
        }

        metrics::histogram!("dispatch_batch_duration_seconds").record(started.elapsed().as_secs_f64());

        let mut result = DeliveryReporter::aggregate(outcomes);
        result.suppressed_count = suppressed;
        info!(
            success = result.success_count,
            failure = result.failure_count,
            suppressed = result.suppressed_count,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Dispatch batch complete."
        );
        result
    }

    fn notified_within_window(&self, subscriber: &Subscriber, at: DateTime<Utc>) -> bool {
        match subscriber.last_notified_at {
            Some(last) => match (at - last).to_std() {
                Ok(elapsed) => elapsed < self.settings.cooldown,
                // Notified after this event was raised.
                Err(_) => true,
            },
            None => false,
        }
    }

    /// Records a finished delivery. The window is stamped with the event
    /// time so that it is measured on the same clock as the next trigger.
    async fn settle(&self, outcome: &DeliveryOutcome, triggered_at: DateTime<Utc>) {
        if outcome.success {
            self.registry.mark_notified(&outcome.subscriber_id, triggered_at);
        } else {
            self.ledger.release(&outcome.subscriber_id).await;
        }
    }
}

/// The attempt loop for a single subscriber.
struct DeliveryJob {
    transport: Arc<dyn PushTransport>,
    notification: Arc<Notification>,
    subscriber: Subscriber,
    max_attempts: u32,
    initial_backoff: Duration,
    max_backoff: Duration,
    attempts: Arc<AtomicU32>,
    semaphore: Arc<Semaphore>,
    cancel_rx: watch::Receiver<bool>,
}

impl DeliveryJob {
    async fn run(mut self) -> DeliveryOutcome {
        let id = self.subscriber.id.clone();

        let permit = tokio::select! {
            biased;
            _ = cancelled(&mut self.cancel_rx) => None,
            permit = self.semaphore.clone().acquire_owned() => permit.ok(),
        };
        let Some(_permit) = permit else {
            return DeliveryOutcome::failed(id, 0, DeliveryErrorKind::Timeout);
        };

        let mut backoff = self.initial_backoff;
        loop {
            if *self.cancel_rx.borrow() {
                return DeliveryOutcome::failed(id, self.attempts.load(Ordering::SeqCst), DeliveryErrorKind::Timeout);
            }

            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            metrics::counter!("delivery_attempts_total").increment(1);

            match self
                .transport
                .send(&self.subscriber.endpoint_token, &self.notification)
                .await
            {
                Ok(()) => {
                    debug!(subscriber_id = %id, attempt, "Notification delivered.");
                    return DeliveryOutcome::delivered(id, attempt);
                }
                Err(DeliveryError::Permanent(reason)) => {
                    warn!(subscriber_id = %id, attempt, reason = %reason, "Endpoint rejected permanently, not retrying.");
                    return DeliveryOutcome::failed(id, attempt, DeliveryErrorKind::Permanent);
                }
                Err(DeliveryError::Transient(reason)) => {
                    if attempt >= self.max_attempts {
                        warn!(subscriber_id = %id, attempt, reason = %reason, "Giving up after transient failures.");
                        return DeliveryOutcome::failed(id, attempt, DeliveryErrorKind::Transient);
                    }

                    let delay = with_jitter(backoff);
                    debug!(subscriber_id = %id, attempt, backoff_ms = delay.as_millis() as u64, reason = %reason, "Retrying after backoff");
                    tokio::select! {
                        biased;
                        _ = cancelled(&mut self.cancel_rx) => {
                            return DeliveryOutcome::failed(id, attempt, DeliveryErrorKind::Timeout);
                        }
                        _ = sleep(delay) => {}
                    }
                    backoff = backoff.saturating_mul(2).min(self.max_backoff);
                }
            }
        }
    }
}

/// Resolves once the batch is cancelled or has gone away.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    let _ = rx.wait_for(|cancelled| *cancelled).await;
}

/// Adds up to 10% random jitter so retries from one batch do not align.
fn with_jitter(delay: Duration) -> Duration {
    let spread = (delay.as_millis() as u64) / 10;
    if spread == 0 {
        return delay;
    }
    delay + Duration::from_millis(rand::rng().random_range(0..=spread))
}

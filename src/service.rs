//! The alert sequencer.
//!
//! `AlertService` owns the debouncer and processes readings strictly one at
//! a time: a reading is debounced and, if it starts an alert wave, the
//! registry is snapshotted, the batch is dispatched, the result is reported
//! and permanently failed subscribers are deregistered before the next
//! reading is looked at.

use crate::core::{AlertEvent, DeliveryBatchResult, SensorStatus};
use crate::debounce::AlertDebouncer;
use crate::dispatch::DispatchEngine;
use crate::registry::SubscriberRegistry;
use crate::reporter::DeliveryReporter;
use crate::watcher::StatusSubscription;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

pub struct AlertService {
    debouncer: AlertDebouncer,
    registry: Arc<SubscriberRegistry>,
    dispatcher: Arc<DispatchEngine>,
    reporter: Arc<DeliveryReporter>,
}

impl AlertService {
    pub fn new(
        debouncer: AlertDebouncer,
        registry: Arc<SubscriberRegistry>,
        dispatcher: Arc<DispatchEngine>,
        reporter: Arc<DeliveryReporter>,
    ) -> Self {
        Self {
            debouncer,
            registry,
            dispatcher,
            reporter,
        }
    }

    /// Handles one reading to completion.
    ///
    /// # Returns
    /// * `Some(DeliveryBatchResult)` if the reading triggered an alert
    /// * `None` if the debouncer did not fire
    pub async fn handle(&mut self, status: SensorStatus) -> Option<DeliveryBatchResult> {
        let event = self.debouncer.observe(status)?;
        Some(self.deliver(&event).await)
    }

    /// Delivers one alert event to the current subscribers.
    pub async fn deliver(&self, event: &AlertEvent) -> DeliveryBatchResult {
        if let Err(e) = self.registry.refresh().await {
            error!(error = %e, "Subscriber registry unavailable, aborting alert batch.");
            let result = DeliveryReporter::registry_unavailable(self.registry.len());
            self.reporter.publish(event, &result);
            return result;
        }

        let snapshot = self.registry.snapshot();
        let result = if snapshot.is_empty() {
            warn!("Alert triggered but no subscribers are registered.");
            DeliveryBatchResult::default()
        } else {
            self.dispatcher.dispatch(event, snapshot).await
        };
        self.reporter.publish(event, &result);

        for subscriber_id in &result.to_deregister {
            match self.registry.remove(subscriber_id).await {
                Ok(_) => {
                    metrics::counter!("subscribers_deregistered_total").increment(1);
                    info!(subscriber_id = %subscriber_id, "Deregistered subscriber with invalid endpoint.");
                }
                Err(e) => {
                    warn!(subscriber_id = %subscriber_id, error = %e, "Failed to deregister subscriber.");
                }
            }
        }

        result
    }

    /// Consumes readings until the feed ends or shutdown is signalled.
    ///
    /// A shutdown that arrives during a dispatch cancels the batch: pending
    /// retries are dropped and no new sends are started.
    pub async fn run(mut self, mut subscription: StatusSubscription, mut shutdown_rx: watch::Receiver<()>) {
        info!("Alert service started.");
        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.changed() => {
                    info!("Alert service received shutdown signal.");
                    break;
                }
                next = subscription.next() => {
                    let Some(status) = next else {
                        info!("Status feed ended.");
                        break;
                    };
                    tokio::select! {
                        biased;
                        _ = shutdown_rx.changed() => {
                            warn!("Shutdown during alert delivery, cancelling batch.");
                            break;
                        }
                        _ = self.handle(status) => {}
                    }
                }
            }
        }
        subscription.unsubscribe();
        info!("Alert service finished.");
    }
}

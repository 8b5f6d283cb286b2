//! Aggregation and publication of delivery outcomes.
//!
//! `DeliveryReporter::aggregate` turns the per-subscriber outcomes of one
//! batch into a `DeliveryBatchResult`. `publish` records the result as
//! metrics and logs and fans it out on a broadcast channel so that external
//! observers (dashboards, audit sinks) can follow alert deliveries without
//! the core knowing about them.

use crate::core::{AlertEvent, DeliveryBatchResult, DeliveryErrorKind, DeliveryOutcome};
use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// A published batch result together with the alert that caused it.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryReport {
    pub triggered_at: DateTime<Utc>,
    pub location: String,
    pub gas_level: f64,
    pub result: DeliveryBatchResult,
}

pub struct DeliveryReporter {
    report_tx: broadcast::Sender<DeliveryReport>,
}

impl DeliveryReporter {
    pub fn new(capacity: usize) -> Self {
        let (report_tx, _) = broadcast::channel(capacity.max(1));
        Self { report_tx }
    }

    /// Folds per-subscriber outcomes into a batch result.
    pub fn aggregate<I>(outcomes: I) -> DeliveryBatchResult
    where
        I: IntoIterator<Item = DeliveryOutcome>,
    {
        let mut outcomes: Vec<DeliveryOutcome> = outcomes.into_iter().collect();
        outcomes.sort_by(|a, b| a.subscriber_id.cmp(&b.subscriber_id));

        let success_count = outcomes.iter().filter(|o| o.success).count();
        let to_deregister = outcomes
            .iter()
            .filter(|o| o.error_kind == Some(DeliveryErrorKind::Permanent))
            .map(|o| o.subscriber_id.clone())
            .collect();

        DeliveryBatchResult {
            success_count,
            failure_count: outcomes.len() - success_count,
            suppressed_count: 0,
            to_deregister,
            aborted: None,
            outcomes,
        }
    }

    /// The result of a batch abandoned because the registry could not be read.
    ///
    /// Every subscriber known at the time counts as failed; nothing is retried.
    pub fn registry_unavailable(known_subscribers: usize) -> DeliveryBatchResult {
        DeliveryBatchResult {
            failure_count: known_subscribers,
            aborted: Some(DeliveryErrorKind::RegistryUnavailable),
            ..Default::default()
        }
    }

    /// Returns a receiver for every report published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<DeliveryReport> {
        self.report_tx.subscribe()
    }

    /// Records a batch result in metrics and logs and broadcasts it.
    pub fn publish(&self, event: &AlertEvent, result: &DeliveryBatchResult) {
        metrics::counter!("deliveries_total", "outcome" => "success").increment(result.success_count as u64);
        metrics::counter!("deliveries_total", "outcome" => "suppressed").increment(result.suppressed_count as u64);
        for outcome in result.outcomes.iter().filter(|o| !o.success) {
            let kind = outcome.error_kind.map_or("unknown", |k| k.as_str());
            metrics::counter!("deliveries_total", "outcome" => kind).increment(1);
        }

        match result.aborted {
            Some(kind) => error!(
                reason = %kind,
                failed = result.failure_count,
                "Alert batch aborted before delivery."
            ),
            None if result.failure_count > 0 => warn!(
                success = result.success_count,
                failure = result.failure_count,
                deregister = result.to_deregister.len(),
                "Alert delivered with failures."
            ),
            None => info!(
                success = result.success_count,
                suppressed = result.suppressed_count,
                "Alert delivered."
            ),
        }

        let report = DeliveryReport {
            triggered_at: event.triggered_at,
            location: event.current.location().to_string(),
            gas_level: event.current.gas_level,
            result: result.clone(),
        };
        // Having no observers is fine.
        let _ = self.report_tx.send(report);
    }
}

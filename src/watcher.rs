//! Watches the detector status in the external store.
//!
//! The `StateWatcher` attaches to a `StatusSource`, normalizes every raw value
//! written at its path into a `SensorStatus` and hands the readings, in write
//! order, to a single consumer through a `StatusSubscription`. It never
//! deduplicates and never fails on bad input: missing or mistyped fields are
//! replaced by their defaults and logged.

use crate::core::{RawStatusStream, SensorStatus, SourceEvent, StatusSource, UNKNOWN_LOCATION};
use chrono::{DateTime, Utc};
use futures::{Stream, StreamExt};
use serde_json::Value;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const SUBSCRIPTION_BUFFER: usize = 64;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StatusError {
    #[error("malformed status payload: `{field}` {reason}")]
    Malformed { field: &'static str, reason: String },

    #[error("status source unavailable: {0}")]
    SourceUnavailable(String),
}

impl StatusError {
    fn malformed(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Malformed {
            field,
            reason: reason.into(),
        }
    }
}

/// Normalizes a raw status record, using the current time for a missing timestamp.
pub fn normalize(raw: &Value) -> (SensorStatus, Vec<StatusError>) {
    normalize_at(raw, Utc::now())
}

/// Normalizes a raw status record field by field.
///
/// Defaults: `gasLevel = 0`, `isLeakDetected = false`, `timestamp = now`,
/// `location = "Unknown"`. Every defaulted or coerced field is reported in the
/// returned issue list.
pub fn normalize_at(raw: &Value, now: DateTime<Utc>) -> (SensorStatus, Vec<StatusError>) {
    let mut issues = Vec::new();

    let Some(record) = raw.as_object() else {
        issues.push(StatusError::malformed(
            "payload",
            format!("is not an object: {}", raw),
        ));
        return (
            SensorStatus::new(0.0, false, now, UNKNOWN_LOCATION),
            issues,
        );
    };

    let gas_level = match record.get("gasLevel") {
        Some(Value::Number(n)) => n.as_f64().unwrap_or_else(|| {
            issues.push(StatusError::malformed("gasLevel", "is not representable"));
            0.0
        }),
        Some(Value::String(s)) => match s.trim().parse::<f64>() {
            Ok(level) if level.is_finite() => {
                issues.push(StatusError::malformed("gasLevel", "was sent as a string"));
                level
            }
            _ => {
                issues.push(StatusError::malformed("gasLevel", format!("is not numeric: {:?}", s)));
                0.0
            }
        },
        None | Some(Value::Null) => {
            issues.push(StatusError::malformed("gasLevel", "is missing"));
            0.0
        }
        Some(other) => {
            issues.push(StatusError::malformed("gasLevel", format!("has wrong type: {}", other)));
            0.0
        }
    };

    let is_leak_detected = match record.get("isLeakDetected") {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => {
            issues.push(StatusError::malformed("isLeakDetected", "was sent as a number"));
            n.as_f64().is_some_and(|v| v != 0.0)
        }
        Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" => {
                issues.push(StatusError::malformed("isLeakDetected", "was sent as a string"));
                true
            }
            "false" | "0" => {
                issues.push(StatusError::malformed("isLeakDetected", "was sent as a string"));
                false
            }
            _ => {
                issues.push(StatusError::malformed("isLeakDetected", format!("is not a boolean: {:?}", s)));
                false
            }
        },
        None | Some(Value::Null) => {
            issues.push(StatusError::malformed("isLeakDetected", "is missing"));
            false
        }
        Some(other) => {
            issues.push(StatusError::malformed("isLeakDetected", format!("has wrong type: {}", other)));
            false
        }
    };

    let timestamp = match record.get("timestamp") {
        Some(Value::Number(n)) => {
            let millis = n.as_i64().or_else(|| n.as_f64().map(|f| f as i64));
            match millis.and_then(DateTime::from_timestamp_millis) {
                Some(ts) => ts,
                None => {
                    issues.push(StatusError::malformed("timestamp", format!("is out of range: {}", n)));
                    now
                }
            }
        }
        None | Some(Value::Null) => {
            issues.push(StatusError::malformed("timestamp", "is missing"));
            now
        }
        Some(other) => {
            issues.push(StatusError::malformed("timestamp", format!("has wrong type: {}", other)));
            now
        }
    };

    let location = match record.get("location") {
        Some(Value::String(s)) if !s.trim().is_empty() => s.clone(),
        Some(Value::String(_)) => {
            issues.push(StatusError::malformed("location", "is empty"));
            UNKNOWN_LOCATION.to_string()
        }
        None | Some(Value::Null) => {
            issues.push(StatusError::malformed("location", "is missing"));
            UNKNOWN_LOCATION.to_string()
        }
        Some(other) => {
            issues.push(StatusError::malformed("location", format!("has wrong type: {}", other)));
            UNKNOWN_LOCATION.to_string()
        }
    };

    (
        SensorStatus::new(gas_level, is_leak_detected, timestamp, location),
        issues,
    )
}

/// Observes one status path and emits normalized readings.
pub struct StateWatcher {
    source: Arc<dyn StatusSource>,
    path: String,
}

impl StateWatcher {
    /// Creates a watcher for `path` on the given status source.
    pub fn new(source: Arc<dyn StatusSource>, path: impl Into<String>) -> Self {
        Self {
            source,
            path: path.into(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Attaches a listener to the status source.
    ///
    /// The returned subscription yields readings in the order the store emits
    /// them until it is unsubscribed or the source closes.
    pub async fn subscribe(&self) -> Result<StatusSubscription, StatusError> {
        let raw = self.source.subscribe(&self.path).await?;
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let path = self.path.clone();
        info!(path = %path, "Status watcher subscribed.");
        let handle = tokio::spawn(forward_updates(raw, tx, path));
        Ok(StatusSubscription {
            rx,
            forwarder: Some(handle),
        })
    }
}

async fn forward_updates(mut raw: RawStatusStream, tx: mpsc::Sender<SensorStatus>, path: String) {
    while let Some(event) = raw.next().await {
        match event {
            SourceEvent::Value(Value::Null) => {
                debug!(path = %path, "Status node is empty, nothing to forward.");
            }
            SourceEvent::Value(value) => {
                let (status, issues) = normalize(&value);
                metrics::counter!("status_updates_total").increment(1);
                if !issues.is_empty() {
                    metrics::counter!("malformed_status_payloads_total").increment(1);
                    for issue in &issues {
                        warn!(path = %path, error = %issue, "Defaulted field in status payload.");
                    }
                }
                if tx.send(status).await.is_err() {
                    debug!(path = %path, "Status consumer went away, stopping forwarder.");
                    return;
                }
            }
            SourceEvent::Disconnected(reason) => {
                warn!(path = %path, reason = %reason, "Status source disconnected, waiting for the store client to reconnect.");
            }
            SourceEvent::Reconnected => {
                info!(path = %path, "Status source reconnected, resuming updates.");
            }
        }
    }
    info!(path = %path, "Status source closed.");
}

/// Handle to a live status feed.
///
/// Dropping the subscription or calling `unsubscribe` detaches the listener
/// from the status source.
pub struct StatusSubscription {
    rx: mpsc::Receiver<SensorStatus>,
    forwarder: Option<JoinHandle<()>>,
}

impl StatusSubscription {
    /// Waits for the next reading. Returns `None` once the feed has ended.
    pub async fn next(&mut self) -> Option<SensorStatus> {
        self.rx.recv().await
    }

    /// Stops the feed and releases the underlying listener. Safe to call repeatedly.
    pub fn unsubscribe(&mut self) {
        if let Some(handle) = self.forwarder.take() {
            handle.abort();
            self.rx.close();
            debug!("Status subscription cancelled.");
        }
    }

    pub fn is_active(&self) -> bool {
        self.forwarder.as_ref().is_some_and(|h| !h.is_finished())
    }
}

impl Stream for StatusSubscription {
    type Item = SensorStatus;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for StatusSubscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

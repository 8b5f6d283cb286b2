//! Core domain types and collaborator traits for GasWatch
//!
//! This module defines the data structures that flow through the alert
//! pipeline (status readings, subscribers, alert events, delivery outcomes)
//! and the trait contracts for the external collaborators the core talks to:
//! the status source, the push transport and the subscriber persistence.

use crate::notification::Notification;
use crate::registry::RegistryError;
use crate::watcher::StatusError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Location reported when a reading does not carry one.
pub const UNKNOWN_LOCATION: &str = "Unknown";

/// A normalized gas detector reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorStatus {
    /// Measured gas concentration in ppm
    pub gas_level: f64,
    /// Whether the detector currently reports a leak
    pub is_leak_detected: bool,
    /// When the reading was taken
    pub timestamp: DateTime<Utc>,
    /// Where the detector is installed
    pub location: Option<String>,
}

impl SensorStatus {
    pub fn new(
        gas_level: f64,
        is_leak_detected: bool,
        timestamp: DateTime<Utc>,
        location: impl Into<String>,
    ) -> Self {
        Self {
            gas_level,
            is_leak_detected,
            timestamp,
            location: Some(location.into()),
        }
    }

    /// Returns the location, falling back to `"Unknown"`.
    pub fn location(&self) -> &str {
        self.location.as_deref().unwrap_or(UNKNOWN_LOCATION)
    }
}

impl Default for SensorStatus {
    fn default() -> Self {
        Self {
            gas_level: 0.0,
            is_leak_detected: false,
            timestamp: Utc::now(),
            location: Some(UNKNOWN_LOCATION.to_string()),
        }
    }
}

/// A device registered to receive alerts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscriber {
    /// Stable identity of the subscriber (user or device id)
    pub id: String,
    /// Opaque push token for the transport
    pub endpoint_token: String,
    /// When the subscriber last received a successful delivery
    pub last_notified_at: Option<DateTime<Utc>>,
}

impl Subscriber {
    pub fn new(id: impl Into<String>, endpoint_token: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            endpoint_token: endpoint_token.into(),
            last_notified_at: None,
        }
    }
}

/// A qualifying alarm transition produced by the debouncer.
#[derive(Debug, Clone, PartialEq)]
pub struct AlertEvent {
    pub previous: SensorStatus,
    pub current: SensorStatus,
    pub triggered_at: DateTime<Utc>,
}

/// Classification of a failed delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryErrorKind {
    /// Timeouts, rate limits and server errors that survived every retry
    Transient,
    /// The endpoint token is invalid or no longer registered
    Permanent,
    /// The batch deadline passed before the attempts finished
    Timeout,
    /// The subscriber registry could not be read for this batch
    RegistryUnavailable,
}

impl DeliveryErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Permanent => "permanent",
            Self::Timeout => "timeout",
            Self::RegistryUnavailable => "registry_unavailable",
        }
    }
}

impl fmt::Display for DeliveryErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by a single push transport call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("transient delivery failure: {0}")]
    Transient(String),

    #[error("permanent delivery failure: {0}")]
    Permanent(String),
}

impl DeliveryError {
    pub fn kind(&self) -> DeliveryErrorKind {
        match self {
            Self::Transient(_) => DeliveryErrorKind::Transient,
            Self::Permanent(_) => DeliveryErrorKind::Permanent,
        }
    }
}

/// Result of delivering one alert to one subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryOutcome {
    pub subscriber_id: String,
    pub attempts: u32,
    pub success: bool,
    pub error_kind: Option<DeliveryErrorKind>,
}

impl DeliveryOutcome {
    pub fn delivered(subscriber_id: impl Into<String>, attempts: u32) -> Self {
        Self {
            subscriber_id: subscriber_id.into(),
            attempts,
            success: true,
            error_kind: None,
        }
    }

    pub fn failed(subscriber_id: impl Into<String>, attempts: u32, kind: DeliveryErrorKind) -> Self {
        Self {
            subscriber_id: subscriber_id.into(),
            attempts,
            success: false,
            error_kind: Some(kind),
        }
    }
}

/// Aggregate of every outcome for one alert event.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct DeliveryBatchResult {
    pub success_count: usize,
    pub failure_count: usize,
    /// Subscribers skipped because they were already notified in this cooldown window
    pub suppressed_count: usize,
    /// Subscribers whose endpoint was classified as permanently invalid
    pub to_deregister: Vec<String>,
    /// Set when the whole batch was abandoned before any delivery
    pub aborted: Option<DeliveryErrorKind>,
    pub outcomes: Vec<DeliveryOutcome>,
}

// =============================================================================
// Collaborator Traits
// =============================================================================

/// A raw event from the status store.
#[derive(Debug, Clone, PartialEq)]
pub enum SourceEvent {
    /// The watched value was written
    Value(serde_json::Value),
    /// The store client lost its connection or dropped updates
    Disconnected(String),
    /// The store client re-established its connection
    Reconnected,
}

/// A live feed of raw events for one path. Dropping it releases the listener.
pub type RawStatusStream = BoxStream<'static, SourceEvent>;

/// The external store holding the detector status.
#[async_trait]
pub trait StatusSource: Send + Sync {
    /// Starts listening for writes to `path`.
    ///
    /// # Returns
    /// * `Ok(RawStatusStream)` emitting one event per write, in write order
    /// * `Err` if the listener could not be attached
    async fn subscribe(&self, path: &str) -> Result<RawStatusStream, StatusError>;
}

/// Delivers push notifications to device endpoints.
#[async_trait]
pub trait PushTransport: Send + Sync {
    /// A short name for logs and metrics (e.g., "expo", "log").
    fn name(&self) -> &str;

    /// Sends one notification to one endpoint token.
    ///
    /// # Returns
    /// * `Ok(())` once the transport accepted the message
    /// * `Err(DeliveryError::Transient)` if a retry may succeed
    /// * `Err(DeliveryError::Permanent)` if the token is invalid
    async fn send(&self, token: &str, notification: &Notification) -> Result<(), DeliveryError>;
}

/// Durable mapping of subscriber id to push token.
#[async_trait]
pub trait SubscriberStore: Send + Sync {
    async fn load_all(&self) -> Result<HashMap<String, String>, RegistryError>;
    async fn put(&self, id: &str, token: &str) -> Result<(), RegistryError>;
    async fn delete(&self, id: &str) -> Result<(), RegistryError>;
}

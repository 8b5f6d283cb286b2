//! Push notification payloads and transports.
//!
//! A `Notification` is derived once per alert event from the triggering
//! reading and handed to a `PushTransport` for every subscriber. Two
//! transports ship with the crate: the Expo push service client and a
//! logging transport for dry runs.

pub mod expo;
pub mod logging;

use crate::core::SensorStatus;
use serde::Serialize;

pub use expo::ExpoPushTransport;
pub use logging::LoggingTransport;

/// Value of `data.type` that tells clients to show the emergency screen.
pub const GAS_LEAK_TYPE: &str = "gas_leak";

pub const GAS_LEAK_TITLE: &str = "⚠️ GAS LEAK DETECTED!";

/// Structured data attached to a notification.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationData {
    #[serde(rename = "type")]
    pub kind: String,
    pub gas_level: f64,
    pub location: String,
    /// Reading time in epoch milliseconds
    pub timestamp: i64,
}

/// The content delivered to every subscriber for one alert.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub data: NotificationData,
}

impl Notification {
    /// Builds the gas leak alert for a reading.
    pub fn gas_leak(status: &SensorStatus) -> Self {
        let location = status.location().to_string();
        Self {
            title: GAS_LEAK_TITLE.to_string(),
            body: format!(
                "Gas level: {}ppm at {}. Gas supply has been shut off. Evacuate immediately!",
                status.gas_level, location
            ),
            data: NotificationData {
                kind: GAS_LEAK_TYPE.to_string(),
                gas_level: status.gas_level,
                location,
                timestamp: status.timestamp.timestamp_millis(),
            },
        }
    }
}

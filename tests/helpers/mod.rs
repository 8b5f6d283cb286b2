#![allow(dead_code)]
//! Shared fakes for the integration tests.

pub mod fake_transport;

use chrono::Utc;
use gaswatch::core::{AlertEvent, SensorStatus};
use serde_json::{json, Value};

/// A leak reading at `location` with a fresh timestamp.
pub fn leak_event(location: &str, gas_level: f64) -> AlertEvent {
    AlertEvent {
        previous: SensorStatus::default(),
        current: SensorStatus::new(gas_level, true, Utc::now(), location),
        triggered_at: Utc::now(),
    }
}

/// A raw detector record as the hardware writes it.
pub fn raw_status(gas_level: f64, leak: bool, location: &str) -> Value {
    json!({
        "gasLevel": gas_level,
        "isLeakDetected": leak,
        "timestamp": Utc::now().timestamp_millis(),
        "location": location,
    })
}

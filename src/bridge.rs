//! Parses readings sent by the detector's microcontroller bridge.
//!
//! The bridge speaks a single-line `KEY:VALUE` format over serial, e.g.
//! `GAS_LEVEL:500,LEAK:1,LOCATION:Kitchen`. Each parsed line becomes the raw
//! status record that is written to the status store.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use thiserror::Error;

/// Location used when the bridge line does not name one.
pub const BRIDGE_DEFAULT_LOCATION: &str = "Home";

#[derive(Error, Debug, PartialEq)]
pub enum BridgeError {
    #[error("empty line")]
    Empty,

    #[error("field `{0}` is not a KEY:VALUE pair")]
    InvalidPair(String),

    #[error("{key} is not an integer: {value:?}")]
    InvalidNumber { key: &'static str, value: String },

    #[error("invalid JSON record: {0}")]
    Json(String),
}

/// Parses one line from the bridge into a raw status record.
///
/// Lines starting with `{` are taken as JSON records and passed through.
pub fn parse_line(line: &str, now: DateTime<Utc>) -> Result<Value, BridgeError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(BridgeError::Empty);
    }
    if line.starts_with('{') {
        return serde_json::from_str(line).map_err(|e| BridgeError::Json(e.to_string()));
    }

    let mut gas_level = 0i64;
    let mut leak = false;
    let mut location = BRIDGE_DEFAULT_LOCATION.to_string();

    for item in line.split(',') {
        let (key, value) = item
            .split_once(':')
            .ok_or_else(|| BridgeError::InvalidPair(item.to_string()))?;
        let value = value.trim();
        match key.trim() {
            "GAS_LEVEL" => gas_level = parse_int("GAS_LEVEL", value)?,
            "LEAK" => leak = parse_int("LEAK", value)? != 0,
            "LOCATION" => location = value.to_string(),
            // Newer firmware may add keys
            _ => {}
        }
    }

    Ok(json!({
        "gasLevel": gas_level,
        "isLeakDetected": leak,
        "location": location,
        "timestamp": now.timestamp_millis(),
    }))
}

fn parse_int(key: &'static str, value: &str) -> Result<i64, BridgeError> {
    value.parse().map_err(|_| BridgeError::InvalidNumber {
        key,
        value: value.to_string(),
    })
}

//! GasWatch - Gas leak alert fan-out
//!
//! This library watches the status record of a gas detector, turns leak
//! readings into debounced alerts and delivers a push notification to every
//! registered device with bounded concurrency and retries.

pub mod app;
pub mod bridge;
pub mod cli;
pub mod config;
pub mod core;
pub mod debounce;
pub mod dispatch;
pub mod internal_metrics;
pub mod notification;
pub mod registry;
pub mod reporter;
pub mod service;
pub mod store;
pub mod task_manager;
pub mod watcher;

// Re-export core types for convenience
pub use crate::core::*;

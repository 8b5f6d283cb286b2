//! Configuration management for GasWatch
//!
//! This module defines the main `Config` struct and its sub-structs. It uses
//! the `figment` crate to layer, in order: built-in defaults, a
//! `gaswatch.toml` file, environment variables prefixed with `GASWATCH_`
//! (nested keys separated by `__`) and command-line flags.
//!
//! The core components never read this struct directly; `App` converts it
//! into explicit constructor parameters.

use crate::cli::Cli;
use crate::dispatch::DispatchSettings;
use anyhow::{ensure, Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

const MAX_BATCH_TIMEOUT_SECONDS: u64 = 24 * 60 * 60;
const MAX_COOLDOWN_SECONDS: u64 = 365 * 24 * 60 * 60;

pub const DEFAULT_CONFIG_FILE: &str = "gaswatch.toml";

/// The main configuration struct for the application.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct Config {
    /// The logging filter for the application (e.g., "info", "gaswatch=debug").
    pub log_level: String,
    /// How log lines are rendered.
    #[serde(default)]
    pub log_format: LogFormat,
    /// Where the detector status lives in the status store.
    pub status: StatusConfig,
    /// Alert triggering policy.
    pub alerting: AlertingConfig,
    /// Delivery fan-out settings.
    pub dispatch: DispatchConfig,
    /// Push transport settings.
    pub transport: TransportConfig,
    /// Subscriber persistence.
    pub subscribers: SubscribersConfig,
    /// Prometheus exporter settings.
    pub metrics: MetricsConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Configuration for the watched status path.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct StatusConfig {
    /// Path of the detector status record in the store.
    pub path: String,
}

/// Configuration for alert debouncing.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct AlertingConfig {
    /// Minimum time between two alerts, in seconds.
    pub cooldown_seconds: u64,
}

/// Configuration for delivery fan-out.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct DispatchConfig {
    /// Send attempts per subscriber, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry in milliseconds.
    pub initial_backoff_ms: u64,
    /// Upper bound for one retry delay in milliseconds.
    pub max_backoff_ms: u64,
    /// Maximum concurrent sends.
    pub max_concurrency: usize,
    /// Deadline for one alert batch in seconds.
    pub batch_timeout_seconds: u64,
}

/// The push transport to deliver notifications with.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// The Expo push service
    Expo,
    /// Log notifications without sending them
    Log,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportKind::Expo => write!(f, "expo"),
            TransportKind::Log => write!(f, "log"),
        }
    }
}

/// Configuration for the push transport.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct TransportConfig {
    pub kind: TransportKind,
    /// Push service endpoint.
    pub push_url: String,
    /// Per-request timeout in milliseconds.
    pub timeout_ms: u64,
}

/// Configuration for subscriber persistence.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
pub struct SubscribersConfig {
    /// JSON file holding `{"userTokens": {...}}`. Memory-only when unset.
    pub store_path: Option<PathBuf>,
}

/// Configuration for the Prometheus exporter.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub listen_address: SocketAddr,
}

impl Config {
    /// Loads the configuration from defaults, the config file, the
    /// environment and the command line.
    pub fn load(cli: &Cli) -> Result<Self> {
        let config_path = cli
            .config
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
        let config: Self = Self::figment(config_path)
            .merge(cli)
            .extract()
            .context("failed to load configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Loads the configuration from a file path and the environment only.
    pub fn from_file(config_path: impl Into<PathBuf>) -> Result<Self> {
        let config: Self = Self::figment(config_path.into())
            .extract()
            .context("failed to load configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values the dispatcher cannot run with.
    pub fn validate(&self) -> Result<()> {
        let dispatch = &self.dispatch;
        ensure!(dispatch.max_attempts > 0, "dispatch.max_attempts must be at least 1");
        ensure!(dispatch.max_concurrency > 0, "dispatch.max_concurrency must be at least 1");
        ensure!(
            (1..=MAX_BATCH_TIMEOUT_SECONDS).contains(&dispatch.batch_timeout_seconds),
            "dispatch.batch_timeout_seconds must be between 1 and {}, got {}",
            MAX_BATCH_TIMEOUT_SECONDS,
            dispatch.batch_timeout_seconds
        );
        ensure!(
            dispatch.initial_backoff_ms <= dispatch.max_backoff_ms,
            "dispatch.initial_backoff_ms ({}) exceeds dispatch.max_backoff_ms ({})",
            dispatch.initial_backoff_ms,
            dispatch.max_backoff_ms
        );
        ensure!(
            self.alerting.cooldown_seconds <= MAX_COOLDOWN_SECONDS,
            "alerting.cooldown_seconds must be at most {}, got {}",
            MAX_COOLDOWN_SECONDS,
            self.alerting.cooldown_seconds
        );
        Ok(())
    }

    fn figment(config_path: PathBuf) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file(config_path))
            // e.g., GASWATCH_DISPATCH__MAX_ATTEMPTS=5
            .merge(Env::prefixed("GASWATCH_").split("__"))
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.alerting.cooldown_seconds)
    }

    /// The dispatch settings derived from this configuration.
    pub fn dispatch_settings(&self) -> DispatchSettings {
        DispatchSettings {
            max_attempts: self.dispatch.max_attempts,
            initial_backoff: Duration::from_millis(self.dispatch.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.dispatch.max_backoff_ms),
            max_concurrency: self.dispatch.max_concurrency,
            batch_timeout: Duration::from_secs(self.dispatch.batch_timeout_seconds),
            cooldown: self.cooldown(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            status: StatusConfig {
                path: "gasDetector/status".to_string(),
            },
            alerting: AlertingConfig {
                cooldown_seconds: 300,
            },
            dispatch: DispatchConfig {
                max_attempts: 3,
                initial_backoff_ms: 500,
                max_backoff_ms: 30_000,
                max_concurrency: 16,
                batch_timeout_seconds: 30,
            },
            transport: TransportConfig {
                kind: TransportKind::Expo,
                push_url: crate::notification::expo::EXPO_PUSH_URL.to_string(),
                timeout_ms: 10_000,
            },
            subscribers: SubscribersConfig { store_path: None },
            metrics: MetricsConfig {
                enabled: false,
                listen_address: SocketAddr::from(([127, 0, 0, 1], 9464)),
            },
        }
    }
}

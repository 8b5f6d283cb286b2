//! # Internal Metrics Module
//!
//! Metric names used across the crate and the optional Prometheus exporter.
//!
//! The library records through the `metrics` facade only. Whether anything
//! is collected depends on the recorder installed by the binary:
//! `MetricsBuilder` installs a Prometheus recorder and returns a
//! `MetricsServer` that serves `/metrics`.

pub mod server;

use crate::config::MetricsConfig;
use metrics::Unit;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::error;

pub use server::MetricsServer;

const DURATION_BUCKETS: &[f64] = &[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0];

/// Registers descriptions for every metric the crate emits.
pub fn describe_metrics() {
    metrics::describe_counter!("status_updates_total", Unit::Count, "Status records received from the store.");
    metrics::describe_counter!("malformed_status_payloads_total", Unit::Count, "Status records that needed at least one defaulted field.");
    metrics::describe_counter!("alerts_triggered_total", Unit::Count, "Alert waves started by the debouncer.");
    metrics::describe_counter!("alerts_suppressed_total", Unit::Count, "Leak readings ignored because of the cooldown window.");
    metrics::describe_counter!("deliveries_total", Unit::Count, "Per-subscriber delivery results, labeled by outcome.");
    metrics::describe_counter!("delivery_attempts_total", Unit::Count, "Individual push transport calls, including retries.");
    metrics::describe_counter!("subscribers_deregistered_total", Unit::Count, "Subscribers removed after a permanent delivery failure.");
    metrics::describe_gauge!("registered_subscribers", Unit::Count, "Subscribers currently in the registry.");
    metrics::describe_histogram!("dispatch_batch_duration_seconds", Unit::Seconds, "Time to deliver one alert to every subscriber.");
}

/// Builder for the Prometheus exporter.
pub struct MetricsBuilder {
    config: MetricsConfig,
}

impl MetricsBuilder {
    pub fn new(config: MetricsConfig) -> Self {
        Self { config }
    }

    /// Installs the Prometheus recorder and binds the exporter.
    ///
    /// Returns `None` if metrics are disabled or the exporter could not be
    /// set up; the service keeps running without metrics in that case.
    pub async fn build(self, shutdown_rx: watch::Receiver<()>) -> Option<(MetricsServer, SocketAddr)> {
        if !self.config.enabled {
            return None;
        }

        let recorder = match PrometheusBuilder::new()
            .set_buckets_for_metric(Matcher::Suffix("duration_seconds".to_string()), DURATION_BUCKETS)
        {
            Ok(builder) => builder.build_recorder(),
            Err(e) => {
                error!(error = %e, "Invalid histogram buckets for metrics exporter.");
                return None;
            }
        };
        let handle = recorder.handle();

        let listener = match TcpListener::bind(self.config.listen_address).await {
            Ok(listener) => listener,
            Err(e) => {
                error!(address = %self.config.listen_address, error = %e, "Failed to bind metrics server.");
                return None;
            }
        };
        let addr = match listener.local_addr() {
            Ok(addr) => addr,
            Err(e) => {
                error!(error = %e, "Failed to read metrics server address.");
                return None;
            }
        };

        if let Err(e) = metrics::set_global_recorder(recorder) {
            error!(error = %e, "Failed to install Prometheus recorder.");
            return None;
        }
        describe_metrics();

        Some((MetricsServer::new(listener, handle, shutdown_rx), addr))
    }
}

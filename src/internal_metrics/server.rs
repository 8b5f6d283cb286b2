//! # Metrics Server
//!
//! Serves the Prometheus text exposition of all recorded metrics on
//! `GET /metrics` until the shutdown signal fires.

use axum::{routing::get, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error};

pub struct MetricsServer {
    listener: TcpListener,
    prom_handle: PrometheusHandle,
    shutdown_rx: watch::Receiver<()>,
}

impl MetricsServer {
    pub fn new(listener: TcpListener, prom_handle: PrometheusHandle, shutdown_rx: watch::Receiver<()>) -> Self {
        Self {
            listener,
            prom_handle,
            shutdown_rx,
        }
    }

    /// Serves scrapes until shutdown is signalled.
    pub async fn run(self) {
        let Self {
            listener,
            prom_handle,
            mut shutdown_rx,
        } = self;
        let app = Router::new().route("/metrics", get(move || async move { prom_handle.render() }));

        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            })
            .await;
        if let Err(e) = result {
            error!(error = %e, "Metrics server error");
        }
        debug!("Metrics server stopped.");
    }
}

//! The main application logic, decoupled from the entry point.

use crate::{
    config::{Config, TransportKind},
    core::{PushTransport, StatusSource, SubscriberStore},
    debounce::AlertDebouncer,
    dispatch::DispatchEngine,
    internal_metrics::MetricsBuilder,
    notification::{ExpoPushTransport, LoggingTransport},
    registry::{JsonFileSubscriberStore, SubscriberRegistry},
    reporter::{DeliveryReport, DeliveryReporter},
    service::AlertService,
    store::MemoryStatusStore,
    task_manager::TaskManager,
    watcher::StateWatcher,
};
use anyhow::{Context, Result};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::sync::broadcast;
use tracing::info;

const REPORT_CHANNEL_CAPACITY: usize = 64;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);
const ALERT_SERVICE_TASK: &str = "AlertService";

/// A handle to the running application.
pub struct App {
    task_manager: TaskManager,
    registry: Arc<SubscriberRegistry>,
    reporter: Arc<DeliveryReporter>,
    status_store: Option<Arc<MemoryStatusStore>>,
    status_path: String,
    metrics_addr: Option<SocketAddr>,
}

impl App {
    /// Creates a new `AppBuilder` to construct an `App`.
    pub fn builder(config: Config) -> AppBuilder {
        AppBuilder::new(config)
    }

    pub fn registry(&self) -> &Arc<SubscriberRegistry> {
        &self.registry
    }

    /// Subscribes to the result of every alert batch.
    pub fn reports(&self) -> broadcast::Receiver<DeliveryReport> {
        self.reporter.subscribe()
    }

    /// The built-in status store, unless a custom source was supplied.
    pub fn status_store(&self) -> Option<&Arc<MemoryStatusStore>> {
        self.status_store.as_ref()
    }

    pub fn status_path(&self) -> &str {
        &self.status_path
    }

    pub fn metrics_addr(&self) -> Option<SocketAddr> {
        self.metrics_addr
    }

    /// Closes the status feed, lets the alert service finish the readings
    /// already written, then shuts down.
    pub async fn drain(self) {
        match &self.status_store {
            Some(store) => {
                info!("Draining pending detector readings...");
                store.close(&self.status_path);
                self.task_manager.join(ALERT_SERVICE_TASK).await;
            }
            None => info!("Custom status source in use, nothing to drain."),
        }
        self.shutdown().await;
    }

    /// Signals every task to stop and waits for them.
    pub async fn shutdown(self) {
        info!("Shutting down...");
        self.task_manager.shutdown(SHUTDOWN_GRACE).await;
        info!("All tasks shut down.");
    }
}

/// Builder for the main application.
///
/// Components can be overridden for testing or embedding; anything not
/// overridden is built from the configuration.
pub struct AppBuilder {
    config: Config,
    status_source_override: Option<Arc<dyn StatusSource>>,
    transport_override: Option<Arc<dyn PushTransport>>,
    subscriber_store_override: Option<Arc<dyn SubscriberStore>>,
}

impl AppBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            status_source_override: None,
            transport_override: None,
            subscriber_store_override: None,
        }
    }

    /// Watches a custom status source instead of the built-in store.
    pub fn status_source_override(mut self, source: Arc<dyn StatusSource>) -> Self {
        self.status_source_override = Some(source);
        self
    }

    /// Delivers through a custom transport.
    pub fn transport_override(mut self, transport: Arc<dyn PushTransport>) -> Self {
        self.transport_override = Some(transport);
        self
    }

    /// Persists subscribers in a custom store.
    pub fn subscriber_store_override(mut self, store: Arc<dyn SubscriberStore>) -> Self {
        self.subscriber_store_override = Some(store);
        self
    }

    /// Builds every component and starts the alert service.
    ///
    /// The status listener is attached before this returns, so any write
    /// made afterwards is observed.
    pub async fn build(self) -> Result<App> {
        let config = self.config;
        let task_manager = TaskManager::new();

        let metrics_addr = match MetricsBuilder::new(config.metrics.clone())
            .build(task_manager.shutdown_rx())
            .await
        {
            Some((server, addr)) => {
                info!(address = %addr, "Metrics exporter listening.");
                task_manager.spawn("MetricsServer", server.run());
                Some(addr)
            }
            None => None,
        };

        let subscriber_store: Option<Arc<dyn SubscriberStore>> = match self.subscriber_store_override {
            Some(store) => Some(store),
            None => config
                .subscribers
                .store_path
                .as_ref()
                .map(|path| Arc::new(JsonFileSubscriberStore::new(path)) as Arc<dyn SubscriberStore>),
        };
        let registry = Arc::new(match subscriber_store {
            Some(store) => SubscriberRegistry::load(store)
                .await
                .context("failed to load registered subscribers")?,
            None => SubscriberRegistry::new(),
        });
        info!(subscribers = registry.len(), "Subscriber registry ready.");

        let transport: Arc<dyn PushTransport> = match self.transport_override {
            Some(transport) => transport,
            None => match config.transport.kind {
                TransportKind::Expo => Arc::new(
                    ExpoPushTransport::with_endpoint(
                        config.transport.push_url.clone(),
                        Duration::from_millis(config.transport.timeout_ms),
                    )
                    .context("failed to build push transport")?,
                ),
                TransportKind::Log => Arc::new(LoggingTransport::new()),
            },
        };
        info!(transport = transport.name(), "Push transport ready.");

        let (status_source, status_store): (Arc<dyn StatusSource>, Option<Arc<MemoryStatusStore>>) =
            match self.status_source_override {
                Some(source) => (source, None),
                None => {
                    let store = Arc::new(MemoryStatusStore::new());
                    (store.clone(), Some(store))
                }
            };

        let reporter = Arc::new(DeliveryReporter::new(REPORT_CHANNEL_CAPACITY));
        let dispatcher = Arc::new(DispatchEngine::new(
            transport,
            registry.clone(),
            config.dispatch_settings(),
        ));
        let service = AlertService::new(
            AlertDebouncer::new(config.cooldown()),
            registry.clone(),
            dispatcher,
            reporter.clone(),
        );

        let watcher = StateWatcher::new(status_source, config.status.path.clone());
        let subscription = watcher
            .subscribe()
            .await
            .context("failed to subscribe to detector status")?;
        task_manager.spawn(ALERT_SERVICE_TASK, service.run(subscription, task_manager.shutdown_rx()));

        Ok(App {
            task_manager,
            registry,
            reporter,
            status_store,
            status_path: config.status.path,
            metrics_addr,
        })
    }
}

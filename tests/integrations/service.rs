//! End-to-end tests: status writes in, delivery reports out.

#[path = "../helpers/mod.rs"]
mod helpers;

use anyhow::Result;
use gaswatch::app::App;
use gaswatch::config::Config;
use gaswatch::core::{DeliveryError, DeliveryErrorKind};
use gaswatch::reporter::DeliveryReport;
use helpers::{fake_store::FakeSubscriberStore, fake_transport::FakeTransport, raw_status};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

const WAIT: Duration = Duration::from_secs(5);

async fn next_report(reports: &mut broadcast::Receiver<DeliveryReport>) -> DeliveryReport {
    tokio::time::timeout(WAIT, reports.recv())
        .await
        .expect("timed out waiting for a delivery report")
        .expect("report channel closed")
}

async fn build_app(store: Arc<FakeSubscriberStore>, transport: Arc<FakeTransport>) -> Result<App> {
    App::builder(Config::default())
        .subscriber_store_override(store)
        .transport_override(transport)
        .build()
        .await
}

#[tokio::test]
async fn test_leak_reading_reaches_every_subscriber() -> Result<()> {
    let store = Arc::new(FakeSubscriberStore::with_tokens(&[("alice", "tok-a"), ("bob", "tok-b")]));
    let transport = Arc::new(FakeTransport::new());
    let app = build_app(store, transport.clone()).await?;
    let mut reports = app.reports();

    let status_store = app.status_store().expect("built-in store").clone();
    status_store.set(app.status_path(), json!({ "isLeakDetected": true }));

    let report = next_report(&mut reports).await;
    assert_eq!(report.location, "Unknown");
    assert_eq!(report.gas_level, 0.0);
    assert_eq!(report.result.success_count, 2);
    assert_eq!(report.result.failure_count, 0);
    assert_eq!(transport.total_calls(), 2);

    app.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_repeat_leak_within_cooldown_is_not_redelivered() -> Result<()> {
    let store = Arc::new(FakeSubscriberStore::with_tokens(&[("alice", "tok-a")]));
    let transport = Arc::new(FakeTransport::new());
    let app = build_app(store, transport.clone()).await?;
    let mut reports = app.reports();
    let status_store = app.status_store().expect("built-in store").clone();

    status_store.set(app.status_path(), raw_status(1500.0, true, "Kitchen"));
    let first = next_report(&mut reports).await;
    assert_eq!(first.result.success_count, 1);

    status_store.set(app.status_path(), raw_status(1600.0, true, "Kitchen"));
    status_store.set(app.status_path(), raw_status(100.0, false, "Kitchen"));
    status_store.set(app.status_path(), raw_status(1700.0, true, "Kitchen"));
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(matches!(reports.try_recv(), Err(broadcast::error::TryRecvError::Empty)));
    assert_eq!(transport.calls("tok-a"), 1);

    app.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_no_subscribers_yields_empty_report() -> Result<()> {
    let store = Arc::new(FakeSubscriberStore::default());
    let transport = Arc::new(FakeTransport::new());
    let app = build_app(store, transport.clone()).await?;
    let mut reports = app.reports();

    let status_store = app.status_store().expect("built-in store").clone();
    status_store.set(app.status_path(), raw_status(800.0, true, "Basement"));

    let report = next_report(&mut reports).await;
    assert_eq!(report.result.success_count, 0);
    assert_eq!(report.result.failure_count, 0);
    assert_eq!(report.result.aborted, None);
    assert_eq!(transport.total_calls(), 0);

    app.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_unavailable_registry_aborts_the_batch() -> Result<()> {
    let store = Arc::new(FakeSubscriberStore::with_tokens(&[("alice", "tok-a"), ("bob", "tok-b")]));
    let transport = Arc::new(FakeTransport::new());
    let app = build_app(store.clone(), transport.clone()).await?;
    let mut reports = app.reports();

    store.set_offline(true);
    let status_store = app.status_store().expect("built-in store").clone();
    status_store.set(app.status_path(), raw_status(1500.0, true, "Kitchen"));

    let report = next_report(&mut reports).await;
    assert_eq!(report.result.aborted, Some(DeliveryErrorKind::RegistryUnavailable));
    assert_eq!(report.result.success_count, 0);
    assert_eq!(report.result.failure_count, 2);
    assert_eq!(transport.total_calls(), 0);

    app.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_invalid_endpoint_is_removed_from_token_file() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("tokens.json");
    std::fs::write(
        &path,
        r#"{"userTokens":{"alice":"ExponentPushToken[good]","bob":"ExponentPushToken[gone]"}}"#,
    )?;

    let transport = Arc::new(FakeTransport::new());
    transport.script(
        "ExponentPushToken[gone]",
        vec![Err(DeliveryError::Permanent("DeviceNotRegistered".into()))],
    );
    let mut config = Config::default();
    config.subscribers.store_path = Some(path.clone());
    let app = App::builder(config).transport_override(transport.clone()).build().await?;
    let mut reports = app.reports();
    assert_eq!(app.registry().len(), 2);

    let status_store = app.status_store().expect("built-in store").clone();
    status_store.set(app.status_path(), raw_status(1500.0, true, "Kitchen"));

    let report = next_report(&mut reports).await;
    assert_eq!(report.result.to_deregister, vec!["bob".to_string()]);

    tokio::time::timeout(WAIT, async {
        while app.registry().get("bob").is_some() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await?;
    let contents = std::fs::read_to_string(&path)?;
    assert!(contents.contains("alice"));
    assert!(!contents.contains("bob"));

    app.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_drain_delivers_alert_written_before_input_closes() -> Result<()> {
    let store = Arc::new(FakeSubscriberStore::with_tokens(&[("alice", "tok-a"), ("bob", "tok-b")]));
    let transport = Arc::new(FakeTransport::new().with_delay(Duration::from_millis(200)));
    let app = build_app(store, transport.clone()).await?;
    let mut reports = app.reports();

    let status_store = app.status_store().expect("built-in store").clone();
    status_store.set(app.status_path(), raw_status(1500.0, true, "Kitchen"));
    tokio::time::timeout(WAIT, app.drain()).await?;

    let report = reports.try_recv()?;
    assert_eq!(report.location, "Kitchen");
    assert_eq!(report.result.success_count, 2);
    assert_eq!(report.result.failure_count, 0);
    assert_eq!(transport.total_calls(), 2);
    Ok(())
}

#[tokio::test]
async fn test_shutdown_completes_promptly() -> Result<()> {
    let store = Arc::new(FakeSubscriberStore::default());
    let app = build_app(store, Arc::new(FakeTransport::new())).await?;

    tokio::time::timeout(Duration::from_secs(2), app.shutdown()).await?;
    Ok(())
}

//! Integration tests for alert fan-out.

#[path = "../helpers/mod.rs"]
mod helpers;

use chrono::Utc;
use gaswatch::core::{DeliveryError, DeliveryErrorKind, SensorStatus, Subscriber};
use gaswatch::debounce::AlertDebouncer;
use gaswatch::dispatch::{DispatchEngine, DispatchSettings};
use gaswatch::notification::GAS_LEAK_TYPE;
use gaswatch::registry::SubscriberRegistry;
use gaswatch::reporter::DeliveryReporter;
use gaswatch::service::AlertService;
use helpers::{fake_transport::FakeTransport, leak_event};
use std::sync::Arc;
use std::time::Duration;

async fn registry_with(ids: &[&str]) -> Arc<SubscriberRegistry> {
    let registry = Arc::new(SubscriberRegistry::new());
    for id in ids {
        registry
            .add(Subscriber::new(*id, format!("token-{}", id)))
            .await
            .unwrap();
    }
    registry
}

fn fast_settings() -> DispatchSettings {
    DispatchSettings {
        initial_backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(100),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_every_subscriber_receives_the_alert() {
    let registry = registry_with(&["a", "b", "c"]).await;
    let transport = Arc::new(FakeTransport::new());
    let engine = DispatchEngine::new(transport.clone(), registry.clone(), fast_settings());

    let result = engine.dispatch(&leak_event("Kitchen", 1500.0), registry.snapshot()).await;

    assert_eq!(result.success_count, 3);
    assert_eq!(result.failure_count, 0);
    assert!(result.to_deregister.is_empty());
    assert_eq!(transport.total_calls(), 3);
    for (_, notification) in transport.sent() {
        assert_eq!(notification.data.kind, GAS_LEAK_TYPE);
        assert_eq!(notification.data.location, "Kitchen");
        assert!(notification.body.contains("1500ppm at Kitchen"));
    }
    for subscriber in registry.snapshot() {
        assert!(subscriber.last_notified_at.is_some(), "{} not marked", subscriber.id);
    }
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_below_limit_still_deliver() {
    let registry = registry_with(&["a", "b"]).await;
    let transport = Arc::new(FakeTransport::new());
    let flaky = vec![
        Err(DeliveryError::Transient("503".into())),
        Err(DeliveryError::Transient("503".into())),
    ];
    transport.script("token-a", flaky.clone());
    transport.script("token-b", flaky);
    let engine = DispatchEngine::new(transport.clone(), registry.clone(), fast_settings());

    let result = engine.dispatch(&leak_event("Kitchen", 900.0), registry.snapshot()).await;

    assert_eq!(result.success_count, 2);
    assert_eq!(result.failure_count, 0);
    assert!(result.outcomes.iter().all(|o| o.attempts == 3));
    assert_eq!(transport.calls("token-a"), 3);
}

#[tokio::test]
async fn test_permanently_failed_subscriber_is_deregistered() {
    let registry = registry_with(&["a", "b"]).await;
    let transport = Arc::new(FakeTransport::new());
    transport.script("token-b", vec![Err(DeliveryError::Permanent("DeviceNotRegistered".into()))]);
    let dispatcher = Arc::new(DispatchEngine::new(transport.clone(), registry.clone(), fast_settings()));
    let reporter = Arc::new(DeliveryReporter::new(8));
    let service = AlertService::new(AlertDebouncer::default(), registry.clone(), dispatcher, reporter);

    let result = service.deliver(&leak_event("Garage", 700.0)).await;

    assert_eq!(result.success_count, 1);
    assert_eq!(result.failure_count, 1);
    assert_eq!(result.to_deregister, vec!["b".to_string()]);
    assert_eq!(transport.calls("token-b"), 1);
    let ids: Vec<String> = registry.snapshot().into_iter().map(|s| s.id).collect();
    assert_eq!(ids, vec!["a".to_string()]);
}

#[tokio::test]
async fn test_overlapping_dispatches_deliver_once_per_subscriber() {
    let registry = registry_with(&["a", "b", "c", "d"]).await;
    let transport = Arc::new(FakeTransport::new());
    let engine = DispatchEngine::new(transport.clone(), registry.clone(), fast_settings());

    let first_event = leak_event("Kitchen", 1200.0);
    let second_event = leak_event("Kitchen", 1300.0);
    let (first, second) = tokio::join!(
        engine.dispatch(&first_event, registry.snapshot()),
        engine.dispatch(&second_event, registry.snapshot()),
    );

    assert_eq!(first.success_count + second.success_count, 4);
    assert_eq!(first.suppressed_count + second.suppressed_count, 4);
    for id in ["a", "b", "c", "d"] {
        assert_eq!(transport.calls(&format!("token-{}", id)), 1, "{} notified twice", id);
    }
}

#[tokio::test(start_paused = true)]
async fn test_batch_deadline_reports_timeouts() {
    let registry = registry_with(&["a", "b"]).await;
    let transport = Arc::new(FakeTransport::new().with_delay(Duration::from_secs(60)));
    let settings = DispatchSettings {
        batch_timeout: Duration::from_secs(5),
        ..fast_settings()
    };
    let engine = DispatchEngine::new(transport.clone(), registry.clone(), settings);

    let started = tokio::time::Instant::now();
    let result = engine.dispatch(&leak_event("Kitchen", 1500.0), registry.snapshot()).await;

    assert!(started.elapsed() < Duration::from_secs(60));
    assert_eq!(result.success_count, 0);
    assert_eq!(result.failure_count, 2);
    assert!(result
        .outcomes
        .iter()
        .all(|o| o.error_kind == Some(DeliveryErrorKind::Timeout)));
    assert!(result.to_deregister.is_empty());
    for subscriber in registry.snapshot() {
        assert!(subscriber.last_notified_at.is_none());
    }
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_limit_is_respected() {
    let ids: Vec<String> = (0..12).map(|i| format!("user-{:02}", i)).collect();
    let id_refs: Vec<&str> = ids.iter().map(String::as_str).collect();
    let registry = registry_with(&id_refs).await;
    let transport = Arc::new(FakeTransport::new().with_delay(Duration::from_millis(50)));
    let settings = DispatchSettings {
        max_concurrency: 3,
        ..fast_settings()
    };
    let engine = DispatchEngine::new(transport.clone(), registry.clone(), settings);

    let result = engine.dispatch(&leak_event("Kitchen", 1500.0), registry.snapshot()).await;

    assert_eq!(result.success_count, 12);
    assert!(transport.max_in_flight() <= 3, "saw {} concurrent sends", transport.max_in_flight());
    assert_eq!(transport.max_in_flight(), 3);
}

#[tokio::test]
async fn test_empty_registry_yields_empty_result() {
    let registry = registry_with(&[]).await;
    let transport = Arc::new(FakeTransport::new());
    let dispatcher = Arc::new(DispatchEngine::new(transport.clone(), registry.clone(), fast_settings()));
    let service = AlertService::new(
        AlertDebouncer::default(),
        registry,
        dispatcher,
        Arc::new(DeliveryReporter::new(8)),
    );

    let result = service.deliver(&leak_event("Kitchen", 1500.0)).await;

    assert_eq!(result.success_count, 0);
    assert_eq!(result.failure_count, 0);
    assert!(result.outcomes.is_empty());
    assert_eq!(transport.total_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_continuous_leak_realerts_after_cooldown() {
    let cooldown = Duration::from_millis(300);
    let registry = registry_with(&["a"]).await;
    let transport = Arc::new(FakeTransport::new().with_delay(Duration::from_millis(100)));
    let settings = DispatchSettings {
        cooldown,
        ..fast_settings()
    };
    let dispatcher = Arc::new(DispatchEngine::new(transport.clone(), registry.clone(), settings));
    let mut service = AlertService::new(
        AlertDebouncer::new(cooldown),
        registry.clone(),
        dispatcher,
        Arc::new(DeliveryReporter::new(8)),
    );
    let leak = || SensorStatus::new(1500.0, true, Utc::now(), "Kitchen");

    let first = service.handle(leak()).await.expect("first reading alerts");
    assert_eq!(first.success_count, 1);

    // The send delay eats part of the window; the next wave starts right after it.
    tokio::time::sleep(Duration::from_millis(220)).await;
    let second = service.handle(leak()).await.expect("leak past the cooldown alerts again");

    assert_eq!(second.success_count, 1);
    assert_eq!(second.suppressed_count, 0);
    assert_eq!(transport.calls("token-a"), 2);
}

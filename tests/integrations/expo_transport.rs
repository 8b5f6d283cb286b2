//! Integration tests for the Expo push transport against a mock server.

use chrono::Utc;
use gaswatch::core::{DeliveryError, PushTransport, SensorStatus};
use gaswatch::notification::{ExpoPushTransport, Notification};
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const TOKEN: &str = "ExponentPushToken[abc123]";

fn notification() -> Notification {
    Notification::gas_leak(&SensorStatus::new(1500.0, true, Utc::now(), "Kitchen"))
}

async fn transport_for(server: &MockServer) -> ExpoPushTransport {
    ExpoPushTransport::with_endpoint(format!("{}/push/send", server.uri()), Duration::from_secs(2))
        .expect("client should build")
}

async fn mount(server: &MockServer, response: ResponseTemplate) {
    Mock::given(method("POST"))
        .and(path("/push/send"))
        .respond_with(response)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_accepted_ticket_is_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/push/send"))
        .and(body_partial_json(json!({
            "to": TOKEN,
            "title": "⚠️ GAS LEAK DETECTED!",
            "priority": "high",
            "data": { "type": "gas_leak", "location": "Kitchen", "gasLevel": 1500.0 },
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "status": "ok", "id": "ticket-1" }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let transport = transport_for(&server).await;
    let result = transport.send(TOKEN, &notification()).await;

    assert_eq!(result, Ok(()));
}

#[tokio::test]
async fn test_device_not_registered_is_permanent() {
    let server = MockServer::start().await;
    mount(
        &server,
        ResponseTemplate::new(200).set_body_json(json!({
            "data": {
                "status": "error",
                "message": "device is not registered",
                "details": { "error": "DeviceNotRegistered" }
            }
        })),
    )
    .await;

    let result = transport_for(&server).await.send(TOKEN, &notification()).await;

    assert!(matches!(result, Err(DeliveryError::Permanent(_))), "got {:?}", result);
}

#[tokio::test]
async fn test_other_ticket_errors_are_transient() {
    let server = MockServer::start().await;
    mount(
        &server,
        ResponseTemplate::new(200).set_body_json(json!({
            "data": {
                "status": "error",
                "message": "slow down",
                "details": { "error": "MessageRateExceeded" }
            }
        })),
    )
    .await;

    let result = transport_for(&server).await.send(TOKEN, &notification()).await;

    assert!(matches!(result, Err(DeliveryError::Transient(_))), "got {:?}", result);
}

#[tokio::test]
async fn test_server_errors_and_rate_limits_are_transient() {
    for status in [500, 503, 429] {
        let server = MockServer::start().await;
        mount(&server, ResponseTemplate::new(status).set_body_string("unavailable")).await;

        let result = transport_for(&server).await.send(TOKEN, &notification()).await;

        assert!(
            matches!(result, Err(DeliveryError::Transient(_))),
            "status {} gave {:?}",
            status,
            result
        );
    }
}

#[tokio::test]
async fn test_client_errors_are_permanent() {
    let server = MockServer::start().await;
    mount(&server, ResponseTemplate::new(400).set_body_string("bad request")).await;

    let result = transport_for(&server).await.send(TOKEN, &notification()).await;

    assert!(matches!(result, Err(DeliveryError::Permanent(_))), "got {:?}", result);
}

#[tokio::test]
async fn test_slow_service_is_transient() {
    let server = MockServer::start().await;
    mount(
        &server,
        ResponseTemplate::new(200)
            .set_body_json(json!({ "data": { "status": "ok" } }))
            .set_delay(Duration::from_secs(5)),
    )
    .await;

    let transport = ExpoPushTransport::with_endpoint(format!("{}/push/send", server.uri()), Duration::from_millis(200))
        .expect("client should build");
    let result = transport.send(TOKEN, &notification()).await;

    assert!(matches!(result, Err(DeliveryError::Transient(_))), "got {:?}", result);
}

#[tokio::test]
async fn test_malformed_token_never_reaches_the_service() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let result = transport_for(&server).await.send("not-a-token", &notification()).await;

    assert!(matches!(result, Err(DeliveryError::Permanent(_))));
}

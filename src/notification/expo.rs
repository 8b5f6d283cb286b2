//! A client for the Expo push notification service.

use crate::core::{DeliveryError, PushTransport};
use crate::notification::Notification;
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, instrument, warn};

pub const EXPO_PUSH_URL: &str = "https://exp.host/--/api/v2/push/send";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Ticket returned by Expo for a single message.
#[derive(Debug, Deserialize)]
struct PushTicket {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    details: Option<TicketDetails>,
}

#[derive(Debug, Deserialize)]
struct TicketDetails {
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PushResponse {
    data: PushTicket,
}

/// Returns true for tokens shaped like `ExponentPushToken[...]` or `ExpoPushToken[...]`.
pub fn is_expo_token(token: &str) -> bool {
    ["ExponentPushToken[", "ExpoPushToken["]
        .iter()
        .any(|prefix| token.starts_with(prefix) && token.ends_with(']') && token.len() > prefix.len() + 1)
}

/// Sends notifications through the Expo push API.
pub struct ExpoPushTransport {
    client: reqwest::Client,
    push_url: String,
}

impl ExpoPushTransport {
    /// Creates a transport for the public Expo endpoint.
    pub fn new() -> Result<Self, reqwest::Error> {
        Self::with_endpoint(EXPO_PUSH_URL, DEFAULT_TIMEOUT)
    }

    /// Creates a transport for a custom endpoint and request timeout.
    pub fn with_endpoint(push_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            push_url: push_url.into(),
        })
    }

    fn message(token: &str, notification: &Notification) -> Value {
        json!({
            "to": token,
            "sound": "default",
            "title": notification.title,
            "body": notification.body,
            "data": notification.data,
            "priority": "high",
            "channelId": "default",
        })
    }

    fn classify_ticket(ticket: PushTicket) -> Result<(), DeliveryError> {
        if ticket.status == "ok" {
            return Ok(());
        }
        let code = ticket
            .details
            .and_then(|d| d.error)
            .unwrap_or_else(|| "Unknown".to_string());
        let message = format!("{}: {}", code, ticket.message.unwrap_or_default());
        match code.as_str() {
            "DeviceNotRegistered" => Err(DeliveryError::Permanent(message)),
            _ => Err(DeliveryError::Transient(message)),
        }
    }

    fn classify_status(status: StatusCode, body: &str) -> DeliveryError {
        let message = format!("push service returned {}: {}", status, body);
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            DeliveryError::Transient(message)
        } else {
            DeliveryError::Permanent(message)
        }
    }
}

#[async_trait]
impl PushTransport for ExpoPushTransport {
    fn name(&self) -> &str {
        "expo"
    }

    #[instrument(skip(self, token, notification), fields(url = %self.push_url))]
    async fn send(&self, token: &str, notification: &Notification) -> Result<(), DeliveryError> {
        if !is_expo_token(token) {
            return Err(DeliveryError::Permanent(format!("not an Expo push token: {:?}", token)));
        }

        let response = self
            .client
            .post(&self.push_url)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&Self::message(token, notification))
            .send()
            .await
            .map_err(|e| {
                warn!(error = %e, timeout = e.is_timeout(), "HTTP request to push service failed");
                DeliveryError::Transient(e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, body = %body, "Push service rejected the request");
            return Err(Self::classify_status(status, &body));
        }

        let parsed: PushResponse = response
            .json()
            .await
            .map_err(|e| DeliveryError::Transient(format!("unreadable push ticket: {}", e)))?;
        let result = Self::classify_ticket(parsed.data);
        match &result {
            Ok(()) => debug!("Push ticket accepted."),
            Err(e) => warn!(error = %e, "Push ticket reported an error"),
        }
        result
    }
}

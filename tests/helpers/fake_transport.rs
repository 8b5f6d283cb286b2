#![allow(dead_code)]
use async_trait::async_trait;
use gaswatch::core::{DeliveryError, PushTransport};
use gaswatch::notification::Notification;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// A push transport whose results are scripted per token.
///
/// Tokens without a script (or whose script ran out) succeed. Every call is
/// recorded, and the highest number of concurrent calls is tracked.
#[derive(Default)]
pub struct FakeTransport {
    scripts: Mutex<HashMap<String, VecDeque<Result<(), DeliveryError>>>>,
    sent: Mutex<Vec<(String, Notification)>>,
    delay: Mutex<Option<Duration>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every send take `delay` before it resolves.
    pub fn with_delay(self, delay: Duration) -> Self {
        *self.delay.lock().unwrap() = Some(delay);
        self
    }

    pub fn script(&self, token: &str, results: Vec<Result<(), DeliveryError>>) {
        self.scripts
            .lock()
            .unwrap()
            .insert(token.to_string(), results.into_iter().collect());
    }

    /// Number of send calls made for `token`, retries included.
    pub fn calls(&self, token: &str) -> usize {
        self.sent.lock().unwrap().iter().filter(|(t, _)| t == token).count()
    }

    pub fn total_calls(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn sent(&self) -> Vec<(String, Notification)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PushTransport for FakeTransport {
    fn name(&self) -> &str {
        "fake"
    }

    async fn send(&self, token: &str, notification: &Notification) -> Result<(), DeliveryError> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        self.sent
            .lock()
            .unwrap()
            .push((token.to_string(), notification.clone()));

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let result = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(token)
            .and_then(|queue| queue.pop_front())
            .unwrap_or(Ok(()));
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

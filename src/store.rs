//! An in-process status store.
//!
//! `MemoryStatusStore` plays the role of the realtime database the detector
//! writes to: writers `set` a raw record at a path and every listener on that
//! path receives it, in write order. Like a realtime database listener, a new
//! subscriber first receives the value currently stored at the path.

use crate::core::{RawStatusStream, SourceEvent, StatusSource};
use crate::watcher::StatusError;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tracing::{debug, trace};

const DEFAULT_CHANNEL_CAPACITY: usize = 256;

struct PathState {
    tx: broadcast::Sender<SourceEvent>,
    current: Option<Value>,
}

/// A path-addressed store of raw status records with live listeners.
pub struct MemoryStatusStore {
    paths: Mutex<HashMap<String, PathState>>,
    capacity: usize,
}

impl Default for MemoryStatusStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Creates a store whose listeners may fall `capacity` writes behind
    /// before they observe a gap.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            paths: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    fn paths(&self) -> MutexGuard<'_, HashMap<String, PathState>> {
        self.paths.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_path<R>(&self, path: &str, f: impl FnOnce(&mut PathState) -> R) -> R {
        let mut paths = self.paths();
        let state = paths.entry(path.to_string()).or_insert_with(|| PathState {
            tx: broadcast::channel(self.capacity).0,
            current: None,
        });
        f(state)
    }

    /// Writes a raw record at `path` and notifies every listener.
    pub fn set(&self, path: &str, value: Value) {
        self.with_path(path, |state| {
            state.current = Some(value.clone());
            // No listeners is not an error for a store write.
            let delivered = state.tx.send(SourceEvent::Value(value)).unwrap_or(0);
            trace!(path = %path, listeners = delivered, "Status written.");
        });
    }

    /// Returns the record currently stored at `path`.
    pub fn current(&self, path: &str) -> Option<Value> {
        self.paths().get(path).and_then(|state| state.current.clone())
    }

    /// Signals listeners that the connection to the store was lost.
    pub fn disconnect(&self, path: &str, reason: &str) {
        self.with_path(path, |state| {
            let _ = state.tx.send(SourceEvent::Disconnected(reason.to_string()));
        });
    }

    /// Signals listeners that the connection to the store is back.
    pub fn reconnect(&self, path: &str) {
        self.with_path(path, |state| {
            let _ = state.tx.send(SourceEvent::Reconnected);
        });
    }

    /// Drops `path` and ends every listener's feed once it has read the
    /// writes already made.
    pub fn close(&self, path: &str) {
        if self.paths().remove(path).is_some() {
            debug!(path = %path, "Status path closed.");
        }
    }

    /// Number of live listeners attached to `path`.
    pub fn listener_count(&self, path: &str) -> usize {
        self.paths()
            .get(path)
            .map(|state| state.tx.receiver_count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl StatusSource for MemoryStatusStore {
    async fn subscribe(&self, path: &str) -> Result<RawStatusStream, StatusError> {
        let (rx, current) = self.with_path(path, |state| (state.tx.subscribe(), state.current.clone()));
        debug!(path = %path, replay = current.is_some(), "Listener attached to status store.");

        let live = BroadcastStream::new(rx).map(|item| match item {
            Ok(event) => event,
            Err(BroadcastStreamRecvError::Lagged(missed)) => {
                SourceEvent::Disconnected(format!("listener fell behind and missed {} updates", missed))
            }
        });
        let replay = stream::iter(current.map(SourceEvent::Value));
        Ok(replay.chain(live).boxed())
    }
}

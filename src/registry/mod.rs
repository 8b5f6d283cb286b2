//! The set of devices that receive alerts.
//!
//! `SubscriberRegistry` keeps the subscriber map behind an `ArcSwap`: readers
//! take an atomic snapshot (a value copy that later mutations cannot touch),
//! and `add`/`remove`/`mark_notified` publish a whole new map. When built over
//! a `SubscriberStore`, registrations are written through to it and
//! `refresh` re-reads it.

pub mod file_store;

use crate::core::{Subscriber, SubscriberStore};
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

pub use file_store::JsonFileSubscriberStore;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("subscriber registry unavailable: {0}")]
    Unavailable(String),
}

type SubscriberMap = HashMap<String, Subscriber>;

pub struct SubscriberRegistry {
    subscribers: ArcSwap<SubscriberMap>,
    store: Option<Arc<dyn SubscriberStore>>,
}

impl Default for SubscriberRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriberRegistry {
    /// Creates an empty, memory-only registry.
    pub fn new() -> Self {
        Self {
            subscribers: ArcSwap::from_pointee(HashMap::new()),
            store: None,
        }
    }

    /// Creates a registry backed by `store` and loads its current contents.
    pub async fn load(store: Arc<dyn SubscriberStore>) -> Result<Self, RegistryError> {
        let registry = Self {
            subscribers: ArcSwap::from_pointee(HashMap::new()),
            store: Some(store),
        };
        registry.refresh().await?;
        Ok(registry)
    }

    /// Registers a subscriber. An existing id has its token replaced.
    pub async fn add(&self, subscriber: Subscriber) -> Result<(), RegistryError> {
        if let Some(store) = &self.store {
            store.put(&subscriber.id, &subscriber.endpoint_token).await?;
        }

        let id = subscriber.id.clone();
        self.subscribers.rcu(|current| {
            let mut next = SubscriberMap::clone(current);
            let mut incoming = subscriber.clone();
            if let Some(existing) = current.get(&incoming.id) {
                incoming.last_notified_at = incoming.last_notified_at.or(existing.last_notified_at);
            }
            next.insert(incoming.id.clone(), incoming);
            next
        });
        self.publish_size();
        debug!(subscriber_id = %id, "Subscriber registered.");
        Ok(())
    }

    /// Unregisters a subscriber. Returns whether it was present.
    pub async fn remove(&self, id: &str) -> Result<bool, RegistryError> {
        if let Some(store) = &self.store {
            store.delete(id).await?;
        }

        let previous = self.subscribers.rcu(|current| {
            let mut next = SubscriberMap::clone(current);
            next.remove(id);
            next
        });
        let removed = previous.contains_key(id);
        if removed {
            self.publish_size();
            info!(subscriber_id = %id, "Subscriber removed from registry.");
        }
        Ok(removed)
    }

    /// Records a successful delivery time for a subscriber still registered.
    pub fn mark_notified(&self, id: &str, at: DateTime<Utc>) {
        self.subscribers.rcu(|current| {
            let mut next = SubscriberMap::clone(current);
            if let Some(subscriber) = next.get_mut(id) {
                subscriber.last_notified_at = Some(at);
            }
            next
        });
    }

    /// Returns a consistent copy of every subscriber, ordered by id.
    pub fn snapshot(&self) -> Vec<Subscriber> {
        let map = self.subscribers.load_full();
        let mut subscribers: Vec<Subscriber> = map.values().cloned().collect();
        subscribers.sort_by(|a, b| a.id.cmp(&b.id));
        subscribers
    }

    pub fn get(&self, id: &str) -> Option<Subscriber> {
        self.subscribers.load().get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.subscribers.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reloads tokens from the backing store, keeping known delivery times.
    ///
    /// A memory-only registry has nothing to reload and always succeeds.
    pub async fn refresh(&self) -> Result<usize, RegistryError> {
        let Some(store) = &self.store else {
            return Ok(self.len());
        };
        let tokens = store.load_all().await?;

        self.subscribers.rcu(|current| {
            tokens
                .iter()
                .map(|(id, token)| {
                    let mut subscriber = Subscriber::new(id.clone(), token.clone());
                    subscriber.last_notified_at = current.get(id).and_then(|s| s.last_notified_at);
                    (id.clone(), subscriber)
                })
                .collect::<SubscriberMap>()
        });
        self.publish_size();
        debug!(count = tokens.len(), "Subscriber registry refreshed from store.");
        Ok(tokens.len())
    }

    fn publish_size(&self) {
        metrics::gauge!("registered_subscribers").set(self.len() as f64);
    }
}

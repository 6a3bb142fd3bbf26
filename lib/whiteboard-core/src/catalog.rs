//! Live handler and publisher sets shared by all endpoint wirings

use crate::handler::HandlerRegistration;
use crate::publisher::{select_publisher, PublisherEntry};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use whiteboard_api::ServiceId;

/// Concurrent maps of the registered handlers and publishers.
///
/// Locks are held only to insert, remove or copy out entries, never across
/// a lookup or publication.
#[derive(Default)]
pub struct Catalog {
    handlers: RwLock<HashMap<ServiceId, Arc<HandlerRegistration>>>,
    publishers: RwLock<HashMap<ServiceId, PublisherEntry>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a handler, returning the registration it replaces
    pub async fn insert_handler(
        &self,
        registration: Arc<HandlerRegistration>,
    ) -> Option<Arc<HandlerRegistration>> {
        let mut handlers = self.handlers.write().await;
        handlers.insert(registration.id(), registration)
    }

    pub async fn remove_handler(&self, id: ServiceId) -> Option<Arc<HandlerRegistration>> {
        let mut handlers = self.handlers.write().await;
        handlers.remove(&id)
    }

    pub async fn handler(&self, id: ServiceId) -> Option<Arc<HandlerRegistration>> {
        let handlers = self.handlers.read().await;
        handlers.get(&id).cloned()
    }

    /// Copy out all handler registrations
    pub async fn handlers(&self) -> Vec<Arc<HandlerRegistration>> {
        let handlers = self.handlers.read().await;
        handlers.values().cloned().collect()
    }

    /// Insert a publisher, returning the entry it replaces
    pub async fn insert_publisher(&self, entry: PublisherEntry) -> Option<PublisherEntry> {
        let mut publishers = self.publishers.write().await;
        publishers.insert(entry.id, entry)
    }

    pub async fn remove_publisher(&self, id: ServiceId) -> Option<PublisherEntry> {
        let mut publishers = self.publishers.write().await;
        publishers.remove(&id)
    }

    pub async fn publisher(&self, id: ServiceId) -> Option<PublisherEntry> {
        let publishers = self.publishers.read().await;
        publishers.get(&id).cloned()
    }

    /// The publisher new wirings should use
    pub async fn select_publisher(&self) -> Option<PublisherEntry> {
        let publishers = self.publishers.read().await;
        select_publisher(publishers.values()).cloned()
    }
}

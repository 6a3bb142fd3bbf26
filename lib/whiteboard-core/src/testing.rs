//! Test doubles for the engine's collaborators

use crate::message::{HandlerChain, HandlerKind, MessageHandler};
use crate::publisher::{EndpointPublisher, PublishRequest, PublishedEndpoint};
use crate::service::{Implementor, ServiceFactory};
use anyhow::{anyhow, bail};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use whiteboard_api::ServiceId;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PublisherEvent {
    Published(ServiceId, String),
    Applied(ServiceId, Vec<ServiceId>),
    Unpublished(ServiceId, String),
}

/// Publisher using the implementor's "addr" property as its address
#[derive(Default)]
pub struct RecordingPublisher {
    pub events: Mutex<Vec<PublisherEvent>>,
    live: Mutex<HashMap<ServiceId, String>>,
    pub fail_publish: AtomicBool,
    pub duplicate_publications: AtomicUsize,
    pub apply_delay: Option<Duration>,
}

impl RecordingPublisher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_apply_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            apply_delay: Some(delay),
            ..Self::default()
        })
    }

    pub fn events(&self) -> Vec<PublisherEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn live(&self) -> HashMap<ServiceId, String> {
        self.live.lock().unwrap().clone()
    }

    pub fn live_count(&self) -> usize {
        self.live.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl EndpointPublisher for RecordingPublisher {
    fn name(&self) -> &str {
        "RecordingPublisher"
    }

    async fn publish(&self, request: PublishRequest<'_>) -> anyhow::Result<PublishedEndpoint> {
        if self.fail_publish.load(Ordering::SeqCst) {
            bail!("transport refused the endpoint");
        }
        let id = request.implementor.id;
        let address = request
            .implementor
            .properties
            .get_str("addr")
            .map(str::to_string)
            .unwrap_or_else(|| format!("/endpoint/{id}"));

        let mut live = self.live.lock().unwrap();
        if live.insert(id, address.clone()).is_some() {
            self.duplicate_publications.fetch_add(1, Ordering::SeqCst);
        }
        self.events
            .lock()
            .unwrap()
            .push(PublisherEvent::Published(id, address.clone()));

        Ok(PublishedEndpoint {
            implementor: id,
            address,
        })
    }

    async fn apply_handlers(
        &self,
        endpoint: &PublishedEndpoint,
        handlers: &HandlerChain,
    ) -> anyhow::Result<()> {
        if let Some(delay) = self.apply_delay {
            tokio::time::sleep(delay).await;
        }
        for bound in handlers.handlers() {
            if let HandlerKind::Protocol(binding) = bound.handler.kind() {
                if binding == "unsupported" {
                    bail!("handler {} uses unsupported binding {}", bound.id, binding);
                }
            }
        }
        self.events
            .lock()
            .unwrap()
            .push(PublisherEvent::Applied(endpoint.implementor, handlers.ids()));
        Ok(())
    }

    async fn unpublish(&self, endpoint: &PublishedEndpoint) -> anyhow::Result<()> {
        let mut live = self.live.lock().unwrap();
        if live.get(&endpoint.implementor) == Some(&endpoint.address) {
            live.remove(&endpoint.implementor);
            self.events.lock().unwrap().push(PublisherEvent::Unpublished(
                endpoint.implementor,
                endpoint.address.clone(),
            ));
        }
        Ok(())
    }
}

/// Implementor factory counting lookups and releases
#[derive(Default)]
pub struct TestImplementorFactory {
    pub fail: AtomicBool,
    pub delay: Option<Duration>,
    pub gets: AtomicUsize,
    pub ungets: AtomicUsize,
}

impl TestImplementorFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        let factory = Self::default();
        factory.fail.store(true, Ordering::SeqCst);
        Arc::new(factory)
    }

    pub fn outstanding(&self) -> usize {
        self.gets.load(Ordering::SeqCst) - self.ungets.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ServiceFactory<Implementor> for TestImplementorFactory {
    async fn get_service(&self) -> anyhow::Result<Arc<Implementor>> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(anyhow!("implementor service returned nothing"));
        }
        self.gets.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new("implementor"))
    }

    async fn unget_service(&self, _service: Arc<Implementor>) {
        self.ungets.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct TestHandler {
    kind: HandlerKind,
}

#[async_trait::async_trait]
impl MessageHandler for TestHandler {
    fn name(&self) -> &str {
        "TestHandler"
    }

    fn kind(&self) -> HandlerKind {
        self.kind.clone()
    }
}

/// Handler factory counting lookups and releases
pub struct TestHandlerFactory {
    pub kind: HandlerKind,
    pub fail: bool,
    pub gets: AtomicUsize,
    pub ungets: AtomicUsize,
}

impl TestHandlerFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::with(HandlerKind::Logical, false))
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self::with(HandlerKind::Logical, true))
    }

    pub fn of_kind(kind: HandlerKind) -> Arc<Self> {
        Arc::new(Self::with(kind, false))
    }

    fn with(kind: HandlerKind, fail: bool) -> Self {
        Self {
            kind,
            fail,
            gets: AtomicUsize::new(0),
            ungets: AtomicUsize::new(0),
        }
    }
}

#[async_trait::async_trait]
impl ServiceFactory<dyn MessageHandler> for TestHandlerFactory {
    async fn get_service(&self) -> anyhow::Result<Arc<dyn MessageHandler>> {
        if self.fail {
            bail!("handler service returned nothing");
        }
        self.gets.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(TestHandler {
            kind: self.kind.clone(),
        }))
    }

    async fn unget_service(&self, _service: Arc<dyn MessageHandler>) {
        self.ungets.fetch_add(1, Ordering::SeqCst);
    }
}

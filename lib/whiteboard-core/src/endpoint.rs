//! Endpoint wiring
//!
//! One `EndpointRegistration` exists per live implementor identity. Refresh,
//! update and dispose run under the registration's own lock, which is what
//! keeps at most one publication per identity live. The last computed
//! outcome is stored separately so snapshots never wait for a refresh that
//! is blocked on a lookup or publisher.

use crate::catalog::Catalog;
use crate::message::HandlerChain;
use crate::publisher::{PublishRequest, PublishedEndpoint, PublisherEntry};
use crate::service::{guarded, release, Implementor, ServiceFactory, ServiceInstance};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::{debug, info, warn};
use whiteboard_api::{
    EndpointDto, EndpointFailure, FailedEndpointDto, HandlerDto, PropertyBag, ServiceId,
    ServiceReferenceDto,
};

/// Factory producing implementor instances
pub type ImplementorFactory = Arc<dyn ServiceFactory<Implementor>>;

/// Describes an implementor as delivered by its source
#[derive(Clone, Debug, PartialEq)]
pub struct ImplementorDescriptor {
    pub id: ServiceId,
    pub properties: PropertyBag,
}

impl ImplementorDescriptor {
    pub fn new(id: ServiceId, properties: PropertyBag) -> Self {
        Self { id, properties }
    }

    pub fn reference(&self) -> ServiceReferenceDto {
        ServiceReferenceDto::new(self.id, self.properties.clone())
    }
}

/// Last result of wiring one implementor
#[derive(Clone, Debug, PartialEq)]
pub enum WiringOutcome {
    /// Not wired yet, or disposed
    Unbound,
    Published(EndpointDto),
    Failed(FailedEndpointDto),
}

impl WiringOutcome {
    pub fn is_published(&self) -> bool {
        matches!(self, WiringOutcome::Published(_))
    }

    pub fn failure_code(&self) -> Option<EndpointFailure> {
        match self {
            WiringOutcome::Failed(failed) => Some(failed.failure_code),
            _ => None,
        }
    }
}

#[derive(Clone)]
struct ImplementorBinding {
    descriptor: ImplementorDescriptor,
    factory: ImplementorFactory,
}

/// Everything a wiring holds on to. Recorded in the slot as soon as it is
/// acquired, so a refresh dropped mid-flight is still torn down later.
struct LiveWiring {
    instance: ServiceInstance,
    factory: ImplementorFactory,
    published: Option<(PublisherEntry, PublishedEndpoint)>,
}

struct WiringSlot {
    binding: Option<ImplementorBinding>,
    live: Option<LiveWiring>,
}

pub struct EndpointRegistration {
    id: ServiceId,
    slot: tokio::sync::Mutex<WiringSlot>,
    /// Written only under `slot`; a retired registration never wires again
    retired: AtomicBool,
    outcome: RwLock<WiringOutcome>,
}

impl EndpointRegistration {
    pub fn new(id: ServiceId) -> Self {
        Self {
            id,
            slot: tokio::sync::Mutex::new(WiringSlot {
                binding: None,
                live: None,
            }),
            retired: AtomicBool::new(false),
            outcome: RwLock::new(WiringOutcome::Unbound),
        }
    }

    pub fn id(&self) -> ServiceId {
        self.id
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    /// Last outcome; never waits for a refresh in progress
    pub fn outcome(&self) -> WiringOutcome {
        self.outcome
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_outcome(&self, outcome: WiringOutcome) {
        *self.outcome.write().unwrap_or_else(PoisonError::into_inner) = outcome;
    }

    /// Bind a (new) implementor instance source and wire it.
    ///
    /// Returns `None` when the registration was disposed in the meantime;
    /// the caller must then use a fresh registration.
    pub async fn bind(
        &self,
        descriptor: ImplementorDescriptor,
        factory: ImplementorFactory,
        catalog: &Catalog,
    ) -> Option<WiringOutcome> {
        debug_assert_eq!(descriptor.id, self.id);
        let mut slot = self.slot.lock().await;
        if self.is_retired() {
            return None;
        }
        slot.binding = Some(ImplementorBinding {
            descriptor,
            factory,
        });
        Some(self.refresh_locked(&mut slot, catalog).await)
    }

    /// Replace the implementor's properties and re-wire
    pub async fn update(&self, properties: PropertyBag, catalog: &Catalog) -> Option<WiringOutcome> {
        let mut slot = self.slot.lock().await;
        if self.is_retired() {
            return None;
        }
        slot.binding.as_mut()?.descriptor.properties = properties;
        Some(self.refresh_locked(&mut slot, catalog).await)
    }

    /// Re-wire against the current handler and publisher sets
    pub async fn refresh(&self, catalog: &Catalog) -> Option<WiringOutcome> {
        let mut slot = self.slot.lock().await;
        if self.is_retired() || slot.binding.is_none() {
            return None;
        }
        Some(self.refresh_locked(&mut slot, catalog).await)
    }

    /// Unpublish, release the instance and retire the registration.
    ///
    /// Waits for an in-flight refresh, so a racing refresh can never leave
    /// the endpoint live.
    pub async fn dispose(&self) {
        let mut slot = self.slot.lock().await;
        self.teardown(&mut slot).await;
        slot.binding = None;
        self.retired.store(true, Ordering::Release);
        self.set_outcome(WiringOutcome::Unbound);
        debug!(implementor = %self.id, "Disposed endpoint registration");
    }

    async fn refresh_locked(&self, slot: &mut WiringSlot, catalog: &Catalog) -> WiringOutcome {
        self.teardown(slot).await;

        let Some(binding) = slot.binding.clone() else {
            self.set_outcome(WiringOutcome::Unbound);
            return WiringOutcome::Unbound;
        };

        let outcome = match self.wire(slot, &binding, catalog).await {
            Ok(dto) => WiringOutcome::Published(dto),
            Err(failed) => {
                self.teardown(slot).await;
                warn!(
                    implementor = %self.id,
                    code = %failed.failure_code,
                    "Endpoint wiring failed: {}",
                    failed.failure_message
                );
                WiringOutcome::Failed(failed)
            }
        };
        self.set_outcome(outcome.clone());
        outcome
    }

    async fn wire(
        &self,
        slot: &mut WiringSlot,
        binding: &ImplementorBinding,
        catalog: &Catalog,
    ) -> Result<EndpointDto, FailedEndpointDto> {
        let reference = binding.descriptor.reference();
        let fail = |code: EndpointFailure, message: String| FailedEndpointDto {
            implementor: reference.clone(),
            failure_code: code,
            failure_message: message,
        };

        let instance = match guarded(binding.factory.get_service()).await {
            Ok(instance) => instance,
            Err(e) => return Err(fail(EndpointFailure::ServiceNotGettable, format!("{e:#}"))),
        };
        let live = slot.live.insert(LiveWiring {
            instance: instance.clone(),
            factory: binding.factory.clone(),
            published: None,
        });

        let (handlers, handler_dtos) = resolve_handlers(&binding.descriptor.properties, catalog).await;

        let Some(publisher) = catalog.select_publisher().await else {
            return Err(fail(
                EndpointFailure::PublishFailed,
                "no endpoint publisher is available".to_string(),
            ));
        };

        let request = PublishRequest {
            implementor: &reference,
            instance: &instance,
            handlers: &handlers,
        };
        let endpoint = match guarded(publisher.publisher.publish(request)).await {
            Ok(endpoint) => endpoint,
            Err(e) => return Err(fail(EndpointFailure::PublishFailed, format!("{e:#}"))),
        };
        live.published = Some((publisher.clone(), endpoint.clone()));

        if let Err(e) = guarded(publisher.publisher.apply_handlers(&endpoint, &handlers)).await {
            return Err(fail(EndpointFailure::SetHandlerFailed, format!("{e:#}")));
        }

        info!(
            implementor = %self.id,
            address = %endpoint.address,
            publisher = %publisher.id,
            handlers = handlers.len(),
            "Published endpoint"
        );

        Ok(EndpointDto {
            implementor: reference.clone(),
            address: endpoint.address,
            publisher: publisher.id,
            handlers: handler_dtos,
        })
    }

    /// Unpublish and release whatever the slot holds
    async fn teardown(&self, slot: &mut WiringSlot) {
        let Some(live) = slot.live.as_mut() else {
            return;
        };
        if let Some((publisher, endpoint)) = &live.published {
            debug!(implementor = %self.id, address = %endpoint.address, "Unpublishing endpoint");
            unpublish(publisher, endpoint).await;
            live.published = None;
        }
        if let Some(live) = slot.live.take() {
            release_instance(self.id, &live.factory, live.instance).await;
        }
    }
}

/// Matching handlers in invocation order, skipping those that cannot be fetched
async fn resolve_handlers(properties: &PropertyBag, catalog: &Catalog) -> (HandlerChain, Vec<HandlerDto>) {
    let mut matching = Vec::new();
    for registration in catalog.handlers().await {
        if registration.matches(properties).await {
            matching.push(registration);
        }
    }
    matching.sort_by(|a, b| b.rank().cmp(&a.rank()).then(a.id().cmp(&b.id())));

    let mut bound = Vec::with_capacity(matching.len());
    let mut dtos = Vec::with_capacity(matching.len());
    for registration in matching {
        if let Some(handler) = registration.bind().await {
            bound.push(handler);
            dtos.push(HandlerDto {
                service: registration.descriptor().reference(),
                rank: registration.rank(),
            });
        }
    }
    (HandlerChain::from_handlers(bound), dtos)
}

async fn unpublish(publisher: &PublisherEntry, endpoint: &PublishedEndpoint) {
    if let Err(e) = guarded(publisher.publisher.unpublish(endpoint)).await {
        warn!(
            implementor = %endpoint.implementor,
            address = %endpoint.address,
            "Unpublishing endpoint failed: {:#}",
            e
        );
    }
}

async fn release_instance(id: ServiceId, factory: &ImplementorFactory, instance: ServiceInstance) {
    if let Err(e) = release(factory.as_ref(), instance).await {
        warn!(implementor = %id, "Releasing implementor failed: {:#}", e);
    }
}

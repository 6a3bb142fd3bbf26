//! Registration notifications delivered by event sources

use crate::endpoint::{ImplementorDescriptor, ImplementorFactory};
use crate::handler::{HandlerDescriptor, HandlerFactory};
use crate::publisher::EndpointPublisher;
use std::sync::Arc;
use whiteboard_api::{PropertyBag, ServiceId};

/// A change in the set of implementors, handlers or publishers
pub enum RegistrationEvent {
    ImplementorRegistered {
        descriptor: ImplementorDescriptor,
        factory: ImplementorFactory,
    },
    ImplementorUpdated {
        id: ServiceId,
        properties: PropertyBag,
    },
    ImplementorUnregistered {
        id: ServiceId,
    },
    HandlerRegistered {
        descriptor: HandlerDescriptor,
        factory: HandlerFactory,
    },
    /// Replaces the descriptor; the factory of the existing registration is kept
    HandlerUpdated {
        descriptor: HandlerDescriptor,
    },
    HandlerUnregistered {
        id: ServiceId,
    },
    PublisherRegistered {
        id: ServiceId,
        rank: i32,
        publisher: Arc<dyn EndpointPublisher>,
    },
    PublisherUpdated {
        id: ServiceId,
        rank: i32,
    },
    PublisherUnregistered {
        id: ServiceId,
    },
}

impl RegistrationEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            RegistrationEvent::ImplementorRegistered { .. } => "implementor_registered",
            RegistrationEvent::ImplementorUpdated { .. } => "implementor_updated",
            RegistrationEvent::ImplementorUnregistered { .. } => "implementor_unregistered",
            RegistrationEvent::HandlerRegistered { .. } => "handler_registered",
            RegistrationEvent::HandlerUpdated { .. } => "handler_updated",
            RegistrationEvent::HandlerUnregistered { .. } => "handler_unregistered",
            RegistrationEvent::PublisherRegistered { .. } => "publisher_registered",
            RegistrationEvent::PublisherUpdated { .. } => "publisher_updated",
            RegistrationEvent::PublisherUnregistered { .. } => "publisher_unregistered",
        }
    }

    /// Identity of the registration the event is about
    pub fn id(&self) -> ServiceId {
        match self {
            RegistrationEvent::ImplementorRegistered { descriptor, .. } => descriptor.id,
            RegistrationEvent::HandlerRegistered { descriptor, .. }
            | RegistrationEvent::HandlerUpdated { descriptor } => descriptor.id,
            RegistrationEvent::ImplementorUpdated { id, .. }
            | RegistrationEvent::ImplementorUnregistered { id }
            | RegistrationEvent::HandlerUnregistered { id }
            | RegistrationEvent::PublisherRegistered { id, .. }
            | RegistrationEvent::PublisherUpdated { id, .. }
            | RegistrationEvent::PublisherUnregistered { id } => *id,
        }
    }
}

impl std::fmt::Debug for RegistrationEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.kind(), self.id())
    }
}

//! Endpoint whiteboard reconciliation engine
//!
//! This library provides:
//! - Registrar coordinating dynamically registered implementors, handlers and publishers
//! - Endpoint wiring: handler matching, publisher selection and (re)publication
//! - LDAP-style filters selecting the implementors a handler applies to
//! - Message handler chains and the publisher contract

pub mod catalog;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod event;
pub mod filter;
pub mod handler;
pub mod message;
pub mod metrics;
pub mod publisher;
pub mod registrar;
pub mod service;

#[cfg(test)]
mod testing;

pub use config::RegistrarConfig;
pub use endpoint::{EndpointRegistration, ImplementorDescriptor, ImplementorFactory, WiringOutcome};
pub use error::{CoreError, Result};
pub use event::RegistrationEvent;
pub use filter::{Filter, FilterError};
pub use handler::{HandlerDescriptor, HandlerFactory, HandlerRegistration, HandlerState};
pub use message::{BoundHandler, HandlerChain, HandlerKind, MessageContext, MessageHandler};
pub use metrics::RegistrarMetrics;
pub use publisher::{EndpointPublisher, PublishRequest, PublishedEndpoint, PublisherEntry};
pub use registrar::Registrar;
pub use service::{Implementor, ServiceFactory, ServiceInstance, SingletonFactory};

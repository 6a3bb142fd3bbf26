//! Whiteboard runtime API types
//!
//! This library defines the values exchanged with the endpoint whiteboard:
//! - ServiceId: identity of every registered implementor, handler and publisher
//! - PropertyBag: the immutable attributes attached to a registration
//! - Failure codes reported for endpoints and handlers
//! - RuntimeSnapshot: point-in-time copy of the runtime state

pub mod failure;
pub mod keys;
pub mod properties;
pub mod service;
pub mod snapshot;

pub use failure::{EndpointFailure, HandlerFailure};
pub use properties::PropertyBag;
pub use service::{ServiceId, ServiceReferenceDto};
pub use snapshot::{EndpointDto, FailedEndpointDto, FailedHandlerDto, HandlerDto, RuntimeSnapshot};

//! HTTP route-table publisher for the endpoint whiteboard
//!
//! Publishes implementors under the context path they declare, below a
//! configured base URL, and resolves inbound request paths back to the
//! implementor and handler chain for a host listener. Binding sockets is
//! left to the host.

pub mod config;
pub mod error;
pub mod publisher;
pub mod route;
pub mod service;

pub use config::HttpPublisherConfig;
pub use error::HttpPublishError;
pub use publisher::HttpPublisher;
pub use route::Route;
pub use service::{HttpService, Operation};

//! Invocable implementors

use async_trait::async_trait;
use hyper::body::Bytes;
use std::sync::Arc;
use whiteboard_core::MessageContext;

/// An operation a host listener can invoke on a published implementor
#[async_trait]
pub trait Operation: Send + Sync {
    async fn invoke(&self, context: &MessageContext, body: Bytes) -> anyhow::Result<Bytes>;
}

/// Implementor instance wrapping an [`Operation`].
///
/// Register implementors as `HttpService` to have
/// [`HttpPublisher::handle`](crate::HttpPublisher::handle) invoke them;
/// other instance types are routed but not invocable.
#[derive(Clone)]
pub struct HttpService {
    operation: Arc<dyn Operation>,
}

impl HttpService {
    pub fn new(operation: Arc<dyn Operation>) -> Self {
        Self { operation }
    }

    pub fn operation(&self) -> &Arc<dyn Operation> {
        &self.operation
    }
}

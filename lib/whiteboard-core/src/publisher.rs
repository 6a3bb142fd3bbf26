//! Endpoint publisher contract

use crate::message::HandlerChain;
use crate::service::ServiceInstance;
use std::sync::Arc;
use whiteboard_api::{ServiceId, ServiceReferenceDto};

/// What a publisher is asked to expose
pub struct PublishRequest<'a> {
    pub implementor: &'a ServiceReferenceDto,
    pub instance: &'a ServiceInstance,
    /// Resolved handler chain, in invocation order
    pub handlers: &'a HandlerChain,
}

/// Result of a successful publication
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublishedEndpoint {
    pub implementor: ServiceId,
    pub address: String,
}

/// Turns implementors into network-reachable endpoints.
///
/// `unpublish` must tolerate an endpoint that is already gone.
#[async_trait::async_trait]
pub trait EndpointPublisher: Send + Sync {
    fn name(&self) -> &str {
        "UnnamedPublisher"
    }

    async fn publish(&self, request: PublishRequest<'_>) -> anyhow::Result<PublishedEndpoint>;

    /// Install the handler chain on a published endpoint
    async fn apply_handlers(
        &self,
        endpoint: &PublishedEndpoint,
        handlers: &HandlerChain,
    ) -> anyhow::Result<()>;

    async fn unpublish(&self, endpoint: &PublishedEndpoint) -> anyhow::Result<()>;
}

/// A registered publisher and its ordering keys
#[derive(Clone)]
pub struct PublisherEntry {
    pub id: ServiceId,
    pub rank: i32,
    pub publisher: Arc<dyn EndpointPublisher>,
}

impl std::fmt::Debug for PublisherEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PublisherEntry")
            .field("id", &self.id)
            .field("rank", &self.rank)
            .field("name", &self.publisher.name())
            .finish()
    }
}

/// Pick the highest ranked publisher, lowest identity on ties
pub fn select_publisher<'a, I>(entries: I) -> Option<&'a PublisherEntry>
where
    I: IntoIterator<Item = &'a PublisherEntry>,
{
    entries
        .into_iter()
        .min_by(|a, b| b.rank.cmp(&a.rank).then(a.id.cmp(&b.id)))
}

//! Message handler contract and ordered handler chains

use anyhow::Result;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, span, Instrument, Level};
use whiteboard_api::ServiceId;

/// What a handler operates on
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum HandlerKind {
    /// Sees message payloads only, usable with any binding
    Logical,
    /// Sees the protocol message of the named binding (e.g. "soap")
    Protocol(String),
}

/// Context passed through a handler chain for one message exchange
#[derive(Clone, Debug)]
pub struct MessageContext {
    /// Address of the endpoint the message is for
    pub address: String,
    /// Operation being invoked, if known
    pub operation: Option<String>,
    /// Transport headers of the inbound message
    pub headers: HashMap<String, String>,
    /// Properties handlers use to talk to each other
    pub properties: Arc<Mutex<HashMap<String, String>>>,
}

impl MessageContext {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            operation: None,
            headers: HashMap::new(),
            properties: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn get_property(&self, key: &str) -> Option<String> {
        self.properties
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    pub fn set_property(&self, key: impl Into<String>, value: impl Into<String>) {
        self.properties
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), value.into());
    }
}

/// A cross-cutting message handler
#[async_trait::async_trait]
pub trait MessageHandler: Send + Sync {
    fn name(&self) -> &str {
        "UnnamedHandler"
    }

    fn kind(&self) -> HandlerKind {
        HandlerKind::Logical
    }

    /// Called for a message travelling towards the implementor
    async fn handle_inbound(&self, _context: &MessageContext) -> Result<()> {
        Ok(())
    }

    /// Called for a message travelling back to the caller
    async fn handle_outbound(&self, _context: &MessageContext) -> Result<()> {
        Ok(())
    }

    /// Called when the exchange produced a fault
    async fn handle_fault(&self, _context: &MessageContext, _fault: &str) -> Result<()> {
        Ok(())
    }
}

/// A handler instance together with the registration it came from
#[derive(Clone)]
pub struct BoundHandler {
    pub id: ServiceId,
    pub rank: i32,
    pub handler: Arc<dyn MessageHandler>,
}

impl std::fmt::Debug for BoundHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundHandler")
            .field("id", &self.id)
            .field("rank", &self.rank)
            .field("name", &self.handler.name())
            .finish()
    }
}

/// Handlers in invocation order: rank descending, then identity ascending
#[derive(Clone, Debug, Default)]
pub struct HandlerChain {
    handlers: Vec<BoundHandler>,
}

impl HandlerChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a chain, putting the handlers into invocation order
    pub fn from_handlers(mut handlers: Vec<BoundHandler>) -> Self {
        handlers.sort_by(|a, b| b.rank.cmp(&a.rank).then(a.id.cmp(&b.id)));
        Self { handlers }
    }

    pub fn handlers(&self) -> &[BoundHandler] {
        &self.handlers
    }

    pub fn ids(&self) -> Vec<ServiceId> {
        self.handlers.iter().map(|h| h.id).collect()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Run inbound processing in chain order
    pub async fn handle_inbound(&self, context: &MessageContext) -> Result<()> {
        for bound in &self.handlers {
            let span = span!(Level::DEBUG, "handler", name = bound.handler.name());
            debug!(parent: &span, "Processing inbound message");
            bound.handler.handle_inbound(context).instrument(span).await?;
        }
        Ok(())
    }

    /// Run outbound processing in reverse chain order
    pub async fn handle_outbound(&self, context: &MessageContext) -> Result<()> {
        for bound in self.handlers.iter().rev() {
            let span = span!(Level::DEBUG, "handler", name = bound.handler.name());
            debug!(parent: &span, "Processing outbound message");
            bound.handler.handle_outbound(context).instrument(span).await?;
        }
        Ok(())
    }

    /// Run fault processing in reverse chain order
    pub async fn handle_fault(&self, context: &MessageContext, fault: &str) -> Result<()> {
        for bound in self.handlers.iter().rev() {
            let span = span!(Level::DEBUG, "handler", name = bound.handler.name());
            debug!(parent: &span, "Processing fault");
            bound.handler.handle_fault(context, fault).instrument(span).await?;
        }
        Ok(())
    }
}

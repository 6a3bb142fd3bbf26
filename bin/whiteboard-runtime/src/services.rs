//! In-memory implementors and handlers declared by the manifest

use crate::manifest::{Change, HandlerEntry, ImplementorEntry};
use async_trait::async_trait;
use hyper::body::Bytes;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};
use whiteboard_core::{
    HandlerDescriptor, HandlerKind, ImplementorDescriptor, MessageContext, MessageHandler,
    RegistrationEvent, ServiceInstance, SingletonFactory,
};
use whiteboard_http::{HttpService, Operation};

/// Replies with its greeting followed by the request body
pub struct EchoOperation {
    greeting: String,
}

impl EchoOperation {
    pub fn new(greeting: impl Into<String>) -> Self {
        Self {
            greeting: greeting.into(),
        }
    }
}

#[async_trait]
impl Operation for EchoOperation {
    async fn invoke(&self, context: &MessageContext, body: Bytes) -> anyhow::Result<Bytes> {
        debug!(address = %context.address, bytes = body.len(), "Echoing request");
        let mut reply = Vec::with_capacity(self.greeting.len() + body.len());
        reply.extend_from_slice(self.greeting.as_bytes());
        reply.extend_from_slice(&body);
        Ok(Bytes::from(reply))
    }
}

/// Logs every message passing through it
pub struct LoggingHandler {
    name: String,
    kind: HandlerKind,
}

impl LoggingHandler {
    pub fn new(name: impl Into<String>, kind: HandlerKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    fn start_key(&self) -> String {
        format!("{}.start", self.name)
    }
}

fn now_millis() -> anyhow::Result<u128> {
    Ok(SystemTime::now().duration_since(UNIX_EPOCH)?.as_millis())
}

#[async_trait]
impl MessageHandler for LoggingHandler {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> HandlerKind {
        self.kind.clone()
    }

    async fn handle_inbound(&self, context: &MessageContext) -> anyhow::Result<()> {
        debug!(
            "Request: {} {} (headers: {})",
            context.address,
            context.operation.as_deref().unwrap_or("-"),
            context.headers.len()
        );
        context.set_property(self.start_key(), now_millis()?.to_string());
        Ok(())
    }

    async fn handle_outbound(&self, context: &MessageContext) -> anyhow::Result<()> {
        let duration = match context
            .get_property(&self.start_key())
            .and_then(|start| start.parse::<u128>().ok())
        {
            Some(start) => now_millis()?.saturating_sub(start),
            None => 0,
        };
        info!(
            handler = %self.name,
            address = %context.address,
            "Response sent (duration: {}ms)",
            duration
        );
        Ok(())
    }

    async fn handle_fault(&self, context: &MessageContext, fault: &str) -> anyhow::Result<()> {
        warn!(handler = %self.name, address = %context.address, "Fault: {}", fault);
        Ok(())
    }
}

fn implementor_registered(entry: ImplementorEntry) -> RegistrationEvent {
    let instance: ServiceInstance = Arc::new(HttpService::new(Arc::new(EchoOperation::new(
        entry.greeting,
    ))));
    RegistrationEvent::ImplementorRegistered {
        descriptor: ImplementorDescriptor::new(entry.id, entry.properties),
        factory: Arc::new(SingletonFactory::new(instance)),
    }
}

fn handler_descriptor(entry: &HandlerEntry) -> HandlerDescriptor {
    HandlerDescriptor::from_properties(entry.id, entry.properties.clone())
}

fn handler_registered(entry: HandlerEntry) -> RegistrationEvent {
    let kind = match &entry.binding {
        Some(binding) => HandlerKind::Protocol(binding.clone()),
        None => HandlerKind::Logical,
    };
    let handler: Arc<dyn MessageHandler> =
        Arc::new(LoggingHandler::new(format!("handler-{}", entry.id), kind));
    RegistrationEvent::HandlerRegistered {
        descriptor: handler_descriptor(&entry),
        factory: Arc::new(SingletonFactory::new(handler)),
    }
}

/// The notification delivering a manifest change
pub fn to_event(change: Change) -> RegistrationEvent {
    match change {
        Change::ImplementorAdded(entry) => implementor_registered(entry),
        Change::ImplementorUpdated(id, properties) => {
            RegistrationEvent::ImplementorUpdated { id, properties }
        }
        Change::ImplementorRemoved(id) => RegistrationEvent::ImplementorUnregistered { id },
        Change::HandlerAdded(entry) => handler_registered(entry),
        Change::HandlerUpdated(entry) => RegistrationEvent::HandlerUpdated {
            descriptor: handler_descriptor(&entry),
        },
        Change::HandlerRemoved(id) => RegistrationEvent::HandlerUnregistered { id },
    }
}

//! Handler registrations
//!
//! A registration owns one dynamically registered message handler: its
//! compiled filter, its lazily fetched backing instance and its failure
//! state. Operations on one registration are serialized by a per-handler
//! gate; different registrations never contend.

use crate::filter::{Filter, FilterError};
use crate::message::{BoundHandler, MessageHandler};
use crate::service::{guarded, release, ServiceFactory};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, warn};
use whiteboard_api::{
    keys, FailedHandlerDto, HandlerDto, HandlerFailure, PropertyBag, ServiceId,
    ServiceReferenceDto,
};

/// Factory producing handler instances
pub type HandlerFactory = Arc<dyn ServiceFactory<dyn MessageHandler>>;

/// Describes a handler as delivered by its source
#[derive(Clone, Debug, PartialEq)]
pub struct HandlerDescriptor {
    pub id: ServiceId,
    /// Higher rank is invoked first; fixed for the life of the registration
    pub rank: i32,
    /// Filter selecting implementors; absent or blank matches all
    pub filter: Option<String>,
    pub properties: PropertyBag,
}

impl HandlerDescriptor {
    pub fn new(id: ServiceId) -> Self {
        Self {
            id,
            rank: 0,
            filter: None,
            properties: PropertyBag::new(),
        }
    }

    pub fn with_rank(mut self, rank: i32) -> Self {
        self.rank = rank;
        self
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// Derive rank and filter from the well-known property keys
    pub fn from_properties(id: ServiceId, properties: PropertyBag) -> Self {
        let rank = properties
            .get_i64(keys::SERVICE_RANKING)
            .and_then(|r| i32::try_from(r).ok())
            .unwrap_or(0);
        let filter = properties.get(keys::HANDLER_FILTER).map(|value| match value.as_str() {
            Some(s) => s.to_string(),
            None => value.to_string(),
        });

        Self {
            id,
            rank,
            filter,
            properties,
        }
    }

    fn compile_filter(&self) -> Result<Option<Filter>, FilterError> {
        match self.properties.get(keys::HANDLER_FILTER) {
            Some(value) if !value.is_string() => Err(FilterError::NotAString),
            _ => Filter::compile_optional(self.filter.as_deref()),
        }
    }

    pub fn reference(&self) -> ServiceReferenceDto {
        ServiceReferenceDto::new(self.id, self.properties.clone())
    }
}

/// Lifecycle of a handler registration
#[derive(Clone)]
pub enum HandlerState {
    Unbound,
    FetchPending,
    Bound(Arc<dyn MessageHandler>),
    LookupFailed(String),
    FilterInvalid(String),
}

impl std::fmt::Debug for HandlerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandlerState::Unbound => f.write_str("Unbound"),
            HandlerState::FetchPending => f.write_str("FetchPending"),
            HandlerState::Bound(handler) => write!(f, "Bound({})", handler.name()),
            HandlerState::LookupFailed(msg) => write!(f, "LookupFailed({msg})"),
            HandlerState::FilterInvalid(msg) => write!(f, "FilterInvalid({msg})"),
        }
    }
}

struct HandlerSlot {
    state: HandlerState,
    disposed: bool,
}

pub struct HandlerRegistration {
    descriptor: HandlerDescriptor,
    filter: Result<Option<Filter>, FilterError>,
    factory: HandlerFactory,
    gate: tokio::sync::Mutex<()>,
    slot: Mutex<HandlerSlot>,
}

impl HandlerRegistration {
    pub fn new(descriptor: HandlerDescriptor, factory: HandlerFactory) -> Self {
        let filter = descriptor.compile_filter();
        if let Err(e) = &filter {
            warn!(handler = %descriptor.id, "Handler filter does not compile: {}", e);
        }

        Self {
            descriptor,
            filter,
            factory,
            gate: tokio::sync::Mutex::new(()),
            slot: Mutex::new(HandlerSlot {
                state: HandlerState::Unbound,
                disposed: false,
            }),
        }
    }

    pub fn id(&self) -> ServiceId {
        self.descriptor.id
    }

    pub fn rank(&self) -> i32 {
        self.descriptor.rank
    }

    pub fn descriptor(&self) -> &HandlerDescriptor {
        &self.descriptor
    }

    pub(crate) fn factory(&self) -> HandlerFactory {
        self.factory.clone()
    }

    pub fn state(&self) -> HandlerState {
        self.slot().state.clone()
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, HandlerSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: HandlerState) {
        self.slot().state = state;
    }

    /// Whether the handler applies to an implementor with `properties`.
    ///
    /// A handler whose filter does not compile never matches and moves to
    /// `FilterInvalid`.
    pub async fn matches(&self, properties: &PropertyBag) -> bool {
        let _gate = self.gate.lock().await;
        if self.slot().disposed {
            return false;
        }
        match &self.filter {
            Ok(Some(filter)) => filter.matches(properties),
            Ok(None) => true,
            Err(e) => {
                self.set_state(HandlerState::FilterInvalid(e.to_string()));
                false
            }
        }
    }

    /// Obtain the backing instance, at most once per binding.
    ///
    /// A failed lookup is retried on the next call, which only happens on
    /// the next refresh.
    pub async fn fetch(&self) -> Option<Arc<dyn MessageHandler>> {
        let _gate = self.gate.lock().await;
        {
            let mut slot = self.slot();
            if slot.disposed || matches!(slot.state, HandlerState::FilterInvalid(_)) {
                return None;
            }
            if let HandlerState::Bound(handler) = &slot.state {
                return Some(handler.clone());
            }
            slot.state = HandlerState::FetchPending;
        }

        match guarded(self.factory.get_service()).await {
            Ok(handler) => {
                debug!(handler = %self.id(), name = handler.name(), "Fetched handler");
                self.set_state(HandlerState::Bound(handler.clone()));
                Some(handler)
            }
            Err(e) => {
                warn!(handler = %self.id(), "Handler lookup failed: {:#}", e);
                self.set_state(HandlerState::LookupFailed(format!("{e:#}")));
                None
            }
        }
    }

    /// Fetch and pair the instance with this registration's ordering keys
    pub async fn bind(&self) -> Option<BoundHandler> {
        self.fetch().await.map(|handler| BoundHandler {
            id: self.id(),
            rank: self.rank(),
            handler,
        })
    }

    /// Release the backing instance and return to `Unbound`.
    ///
    /// Safe to call on a registration that was never bound. A disposed
    /// registration never fetches again.
    pub async fn dispose(&self) {
        let _gate = self.gate.lock().await;
        let released = {
            let mut slot = self.slot();
            slot.disposed = true;
            match std::mem::replace(&mut slot.state, HandlerState::Unbound) {
                HandlerState::Bound(handler) => Some(handler),
                _ => None,
            }
        };

        if let Some(handler) = released {
            debug!(handler = %self.id(), "Releasing handler");
            if let Err(e) = release(self.factory.as_ref(), handler).await {
                warn!(handler = %self.id(), "Releasing handler failed: {:#}", e);
            }
        }
    }

    /// Classify the registration for a runtime snapshot
    pub fn view(&self) -> Result<HandlerDto, FailedHandlerDto> {
        let failed = |code: HandlerFailure, message: Option<String>| FailedHandlerDto {
            service: self.descriptor.reference(),
            rank: self.rank(),
            failure_code: code,
            failure_message: message,
        };

        if let Err(e) = &self.filter {
            return Err(failed(HandlerFailure::InvalidFilter, Some(e.to_string())));
        }
        match self.state() {
            HandlerState::Bound(_) => Ok(HandlerDto {
                service: self.descriptor.reference(),
                rank: self.rank(),
            }),
            HandlerState::FilterInvalid(msg) => Err(failed(HandlerFailure::InvalidFilter, Some(msg))),
            HandlerState::LookupFailed(msg) => {
                Err(failed(HandlerFailure::ServiceNotGettable, Some(msg)))
            }
            HandlerState::Unbound | HandlerState::FetchPending => {
                Err(failed(HandlerFailure::NoMatchingEndpoint, None))
            }
        }
    }
}

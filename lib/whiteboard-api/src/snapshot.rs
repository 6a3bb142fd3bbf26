//! Runtime snapshot DTOs
//!
//! A snapshot is a copy: nothing in it refers back into the live engine.

use crate::{EndpointFailure, HandlerFailure, ServiceId, ServiceReferenceDto};
use serde::{Deserialize, Serialize};

/// A handler bound to at least one endpoint
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandlerDto {
    pub service: ServiceReferenceDto,
    pub rank: i32,
}

/// A handler that is not bound, with the reason
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedHandlerDto {
    pub service: ServiceReferenceDto,
    pub rank: i32,
    pub failure_code: HandlerFailure,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_message: Option<String>,
}

/// A successfully published endpoint
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointDto {
    pub implementor: ServiceReferenceDto,
    /// Network address the endpoint is reachable at
    pub address: String,
    /// Publisher that performed the publication
    pub publisher: ServiceId,
    /// Bound handlers, in invocation order
    pub handlers: Vec<HandlerDto>,
}

/// An endpoint implementor that could not be published
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedEndpointDto {
    pub implementor: ServiceReferenceDto,
    pub failure_code: EndpointFailure,
    pub failure_message: String,
}

/// Point-in-time view of endpoints and handlers
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeSnapshot {
    /// Change count the snapshot was taken at
    pub change_count: u64,
    pub endpoints: Vec<EndpointDto>,
    pub failed_endpoints: Vec<FailedEndpointDto>,
    pub handlers: Vec<HandlerDto>,
    pub failed_handlers: Vec<FailedHandlerDto>,
}

impl RuntimeSnapshot {
    /// Find a published endpoint by implementor identity
    pub fn endpoint(&self, id: ServiceId) -> Option<&EndpointDto> {
        self.endpoints.iter().find(|e| e.implementor.id == id)
    }

    /// Find a failed endpoint by implementor identity
    pub fn failed_endpoint(&self, id: ServiceId) -> Option<&FailedEndpointDto> {
        self.failed_endpoints.iter().find(|e| e.implementor.id == id)
    }

    pub fn handler(&self, id: ServiceId) -> Option<&HandlerDto> {
        self.handlers.iter().find(|h| h.service.id == id)
    }

    pub fn failed_handler(&self, id: ServiceId) -> Option<&FailedHandlerDto> {
        self.failed_handlers.iter().find(|h| h.service.id == id)
    }

    /// Find a published endpoint by address
    pub fn endpoint_at(&self, address: &str) -> Option<&EndpointDto> {
        self.endpoints.iter().find(|e| e.address == address)
    }

    /// Whether `self` was taken at an older change count than `current`
    pub fn is_stale(&self, current: u64) -> bool {
        self.change_count < current
    }
}

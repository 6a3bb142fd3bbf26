//! Stable failure codes reported in runtime snapshots

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Reason an endpoint implementor could not be published
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EndpointFailure {
    /// No publisher was available, or the publisher rejected the endpoint
    PublishFailed,
    /// The implementor's backing instance could not be obtained
    ServiceNotGettable,
    /// The publisher refused the resolved handler chain
    SetHandlerFailed,
}

/// Reason a handler is not bound to any endpoint
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HandlerFailure {
    /// The handler's filter expression does not compile
    InvalidFilter,
    /// The handler's backing instance could not be obtained
    ServiceNotGettable,
    /// No registered implementor has matched the handler
    NoMatchingEndpoint,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown failure code: {0}")]
pub struct UnknownFailureCode(pub String);

impl EndpointFailure {
    pub fn as_str(self) -> &'static str {
        match self {
            EndpointFailure::PublishFailed => "PublishFailed",
            EndpointFailure::ServiceNotGettable => "ServiceNotGettable",
            EndpointFailure::SetHandlerFailed => "SetHandlerFailed",
        }
    }
}

impl HandlerFailure {
    pub fn as_str(self) -> &'static str {
        match self {
            HandlerFailure::InvalidFilter => "InvalidFilter",
            HandlerFailure::ServiceNotGettable => "ServiceNotGettable",
            HandlerFailure::NoMatchingEndpoint => "NoMatchingEndpoint",
        }
    }
}

impl fmt::Display for EndpointFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for HandlerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EndpointFailure {
    type Err = UnknownFailureCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PublishFailed" => Ok(EndpointFailure::PublishFailed),
            "ServiceNotGettable" => Ok(EndpointFailure::ServiceNotGettable),
            "SetHandlerFailed" => Ok(EndpointFailure::SetHandlerFailed),
            other => Err(UnknownFailureCode(other.to_string())),
        }
    }
}

impl FromStr for HandlerFailure {
    type Err = UnknownFailureCode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "InvalidFilter" => Ok(HandlerFailure::InvalidFilter),
            "ServiceNotGettable" => Ok(HandlerFailure::ServiceNotGettable),
            "NoMatchingEndpoint" => Ok(HandlerFailure::NoMatchingEndpoint),
            other => Err(UnknownFailureCode(other.to_string())),
        }
    }
}

use thiserror::Error;
use whiteboard_api::ServiceId;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum HttpPublishError {
    #[error("Implementor {0} has no string context path")]
    MissingContextPath(ServiceId),

    #[error("Context path must start with '/': {0}")]
    InvalidContextPath(String),

    #[error("Context path {path} is already used by implementor {owner}")]
    PathInUse { path: String, owner: ServiceId },

    #[error("Invalid base URL {url}: {reason}")]
    InvalidAddress { url: String, reason: String },

    #[error("Handler {handler} uses unsupported binding {binding}")]
    UnsupportedBinding { handler: ServiceId, binding: String },

    #[error("No route published for implementor {0}")]
    RouteNotFound(ServiceId),
}

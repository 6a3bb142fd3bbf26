use thiserror::Error;
use whiteboard_api::ServiceId;

pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors returned to event sources.
///
/// Collaborator failures never surface here; they are reported through
/// runtime snapshots.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Implementor not found: {0}")]
    ImplementorNotFound(ServiceId),

    #[error("Handler not found: {0}")]
    HandlerNotFound(ServiceId),

    #[error("Publisher not found: {0}")]
    PublisherNotFound(ServiceId),

    #[error("Metrics error: {0}")]
    MetricsError(#[from] prometheus::Error),
}

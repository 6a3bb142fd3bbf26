//! Well-known property keys

/// Unique identity assigned to a registration by its source
pub const SERVICE_ID: &str = "service.id";

/// Integer ranking, higher wins; absent or non-integer means 0
pub const SERVICE_RANKING: &str = "service.ranking";

/// Marks a registration as an endpoint implementor
pub const ENDPOINT_IMPLEMENTOR: &str = "webservice.endpoint.implementor";

/// Absolute address requested by an implementor
pub const ENDPOINT_ADDRESS: &str = "webservice.endpoint.address";

/// Marks a registration as a message handler
pub const HANDLER_EXTENSION: &str = "webservice.handler.extension";

/// Filter expression selecting the implementors a handler applies to
pub const HANDLER_FILTER: &str = "webservice.handler.filter";

/// Context path an HTTP publisher exposes an implementor under
pub const HTTP_CONTEXT_PATH: &str = "webservice.http.contextPath";

//! Published routes and request path matching

use chrono::{DateTime, Utc};
use whiteboard_api::ServiceId;
use whiteboard_core::{HandlerChain, ServiceInstance};

/// One published implementor as seen by a host listener
#[derive(Clone)]
pub struct Route {
    pub implementor: ServiceId,
    pub context_path: String,
    /// Base URL joined with the context path
    pub address: String,
    pub instance: ServiceInstance,
    pub handlers: HandlerChain,
    pub published_at: DateTime<Utc>,
}

impl std::fmt::Debug for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Route")
            .field("implementor", &self.implementor)
            .field("context_path", &self.context_path)
            .field("address", &self.address)
            .field("handlers", &self.handlers.ids())
            .field("published_at", &self.published_at)
            .finish()
    }
}

impl Route {
    /// Whether a request for `path` is served by this route
    pub fn serves(&self, path: &str) -> bool {
        match_context_path(path, &self.context_path)
    }
}

/// Match a request path against a context path.
///
/// The context path matches itself and anything below it on a segment
/// boundary; "/" matches every path.
pub fn match_context_path(path: &str, context_path: &str) -> bool {
    if path == context_path {
        return true;
    }

    let prefix = context_path.trim_end_matches('/');
    if prefix.is_empty() {
        return path.starts_with('/');
    }
    path == prefix || path.starts_with(&format!("{}/", prefix))
}

/// Canonical form of a context path: no trailing `/` except for the root
pub fn normalize_context_path(context_path: &str) -> String {
    match context_path.trim_end_matches('/') {
        "" => "/".to_string(),
        trimmed => trimmed.to_string(),
    }
}

/// Join a base URL and a context path without doubling the separator
pub fn join_address(base_url: &str, context_path: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), context_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_context_path() {
        assert_eq!(normalize_context_path("/orders/"), "/orders");
        assert_eq!(normalize_context_path("/orders"), "/orders");
        assert_eq!(normalize_context_path("/"), "/");
        assert_eq!(normalize_context_path("//"), "/");
    }

    #[test]
    fn test_exact_match() {
        assert!(match_context_path("/orders", "/orders"));
        assert!(!match_context_path("/invoices", "/orders"));
    }

    #[test]
    fn test_segment_prefix_match() {
        assert!(match_context_path("/orders/42", "/orders"));
        assert!(match_context_path("/orders/42", "/orders/"));
        assert!(!match_context_path("/ordersx", "/orders"));
    }

    #[test]
    fn test_root_matches_everything() {
        assert!(match_context_path("/anything/at/all", "/"));
        assert!(!match_context_path("relative", "/"));
    }

    #[test]
    fn test_join_address() {
        assert_eq!(join_address("http://host:8080/", "/orders"), "http://host:8080/orders");
        assert_eq!(join_address("http://host", "/"), "http://host/");
    }
}

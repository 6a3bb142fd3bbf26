//! Route-table endpoint publisher

use crate::config::HttpPublisherConfig;
use crate::error::HttpPublishError;
use crate::route::{join_address, normalize_context_path, Route};
use crate::service::HttpService;
use async_trait::async_trait;
use chrono::Utc;
use hyper::body::Bytes;
use hyper::{Response, StatusCode, Uri};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use whiteboard_api::keys;
use whiteboard_core::{
    EndpointPublisher, HandlerChain, HandlerKind, MessageContext, PublishRequest,
    PublishedEndpoint,
};

/// Publishes implementors as routes below a base URL.
///
/// Routes are keyed by context path; a context path belongs to at most one
/// implementor at a time.
pub struct HttpPublisher {
    config: HttpPublisherConfig,
    routes: RwLock<HashMap<String, Route>>,
}

impl HttpPublisher {
    pub fn new(config: HttpPublisherConfig) -> Result<Self, HttpPublishError> {
        let uri = config
            .base_url
            .parse::<Uri>()
            .map_err(|e| HttpPublishError::InvalidAddress {
                url: config.base_url.clone(),
                reason: e.to_string(),
            })?;
        if uri.scheme().is_none() || uri.authority().is_none() {
            return Err(HttpPublishError::InvalidAddress {
                url: config.base_url.clone(),
                reason: "scheme and authority are required".to_string(),
            });
        }

        Ok(Self {
            config,
            routes: RwLock::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &HttpPublisherConfig {
        &self.config
    }

    /// Find the route serving a request path: exact context path first,
    /// then the longest context path the request falls below
    pub async fn resolve(&self, path: &str) -> Option<Route> {
        let routes = self.routes.read().await;
        if let Some(route) = routes.get(path) {
            return Some(route.clone());
        }
        routes
            .values()
            .filter(|route| route.serves(path))
            .max_by_key(|route| route.context_path.len())
            .cloned()
    }

    /// All published routes, ordered by context path
    pub async fn routes(&self) -> Vec<Route> {
        let routes = self.routes.read().await;
        let mut routes: Vec<_> = routes.values().cloned().collect();
        routes.sort_by(|a, b| a.context_path.cmp(&b.context_path));
        routes
    }

    /// Serve one request for a host listener.
    ///
    /// Runs the route's handler chain inbound, invokes the implementor if it
    /// is an [`HttpService`], then runs the chain outbound. A failure at any
    /// step runs the fault handlers and yields a 500.
    pub async fn handle(
        &self,
        path: &str,
        headers: HashMap<String, String>,
        body: Bytes,
    ) -> Response<Bytes> {
        let Some(route) = self.resolve(path).await else {
            return respond(StatusCode::NOT_FOUND, format!("Not Found: {}\n", path));
        };
        let Some(service) = route.instance.downcast_ref::<HttpService>() else {
            return respond(
                StatusCode::NOT_IMPLEMENTED,
                format!("Implementor {} is not invocable\n", route.implementor),
            );
        };

        let mut context = MessageContext::new(route.address.clone());
        context.headers = headers;

        let result = async {
            route.handlers.handle_inbound(&context).await?;
            let reply = service.operation().invoke(&context, body).await?;
            route.handlers.handle_outbound(&context).await?;
            Ok::<_, anyhow::Error>(reply)
        }
        .await;

        match result {
            Ok(reply) => respond(StatusCode::OK, reply),
            Err(e) => {
                let fault = format!("{e:#}");
                warn!(implementor = %route.implementor, path, "Request failed: {}", fault);
                if let Err(e) = route.handlers.handle_fault(&context, &fault).await {
                    warn!(implementor = %route.implementor, "Fault handling failed: {:#}", e);
                }
                respond(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("Internal Server Error: {}\n", fault),
                )
            }
        }
    }

    fn check_bindings(&self, handlers: &HandlerChain) -> Result<(), HttpPublishError> {
        for bound in handlers.handlers() {
            if let HandlerKind::Protocol(binding) = bound.handler.kind() {
                if !self.config.supports(&binding) {
                    return Err(HttpPublishError::UnsupportedBinding {
                        handler: bound.id,
                        binding,
                    });
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl EndpointPublisher for HttpPublisher {
    fn name(&self) -> &str {
        "HttpPublisher"
    }

    async fn publish(&self, request: PublishRequest<'_>) -> anyhow::Result<PublishedEndpoint> {
        let implementor = request.implementor.id;
        let declared = request
            .implementor
            .properties
            .get_str(keys::HTTP_CONTEXT_PATH)
            .ok_or(HttpPublishError::MissingContextPath(implementor))?;
        if !declared.starts_with('/') {
            return Err(HttpPublishError::InvalidContextPath(declared.to_string()).into());
        }
        let context_path = normalize_context_path(declared);

        let mut routes = self.routes.write().await;
        if let Some(existing) = routes.get(&context_path) {
            if existing.implementor != implementor {
                return Err(HttpPublishError::PathInUse {
                    path: context_path,
                    owner: existing.implementor,
                }
                .into());
            }
        }

        let address = join_address(&self.config.base_url, &context_path);
        routes.insert(
            context_path.clone(),
            Route {
                implementor,
                context_path: context_path.clone(),
                address: address.clone(),
                instance: request.instance.clone(),
                handlers: request.handlers.clone(),
                published_at: Utc::now(),
            },
        );

        info!(implementor = %implementor, address = %address, "Route published");
        Ok(PublishedEndpoint {
            implementor,
            address,
        })
    }

    async fn apply_handlers(
        &self,
        endpoint: &PublishedEndpoint,
        handlers: &HandlerChain,
    ) -> anyhow::Result<()> {
        self.check_bindings(handlers)?;

        let mut routes = self.routes.write().await;
        let route = routes
            .values_mut()
            .find(|route| owns(route, endpoint))
            .ok_or(HttpPublishError::RouteNotFound(endpoint.implementor))?;
        route.handlers = handlers.clone();

        debug!(
            implementor = %endpoint.implementor,
            handlers = handlers.len(),
            "Applied handler chain"
        );
        Ok(())
    }

    async fn unpublish(&self, endpoint: &PublishedEndpoint) -> anyhow::Result<()> {
        let mut routes = self.routes.write().await;
        let before = routes.len();
        routes.retain(|_, route| !owns(route, endpoint));
        if routes.len() < before {
            info!(implementor = %endpoint.implementor, address = %endpoint.address, "Route removed");
        }
        Ok(())
    }
}

fn owns(route: &Route, endpoint: &PublishedEndpoint) -> bool {
    route.implementor == endpoint.implementor && route.address == endpoint.address
}

fn respond(status: StatusCode, body: impl Into<Bytes>) -> Response<Bytes> {
    let mut response = Response::new(body.into());
    *response.status_mut() = status;
    response
}

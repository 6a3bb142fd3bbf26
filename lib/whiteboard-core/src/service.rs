//! Backing service lookup

use anyhow::anyhow;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Type-erased backing instance of an endpoint implementor
pub type Implementor = dyn Any + Send + Sync;

/// Shared handle to an implementor instance
pub type ServiceInstance = Arc<Implementor>;

/// Yields the backing instance of a registration on demand.
///
/// `get_service` may block on an external lookup and may fail. Every
/// instance obtained from `get_service` is handed back exactly once
/// through `unget_service`.
#[async_trait::async_trait]
pub trait ServiceFactory<S: ?Sized + Send + Sync + 'static>: Send + Sync {
    async fn get_service(&self) -> anyhow::Result<Arc<S>>;

    async fn unget_service(&self, _service: Arc<S>) {}
}

/// Factory that always hands out the same instance
pub struct SingletonFactory<S: ?Sized> {
    instance: Arc<S>,
}

impl<S: ?Sized> SingletonFactory<S> {
    pub fn new(instance: Arc<S>) -> Self {
        Self { instance }
    }
}

#[async_trait::async_trait]
impl<S: ?Sized + Send + Sync + 'static> ServiceFactory<S> for SingletonFactory<S> {
    async fn get_service(&self) -> anyhow::Result<Arc<S>> {
        Ok(self.instance.clone())
    }
}

/// Run a call into an external collaborator, turning a panic into an error
pub(crate) async fn guarded<T, F>(call: F) -> anyhow::Result<T>
where
    F: Future<Output = anyhow::Result<T>>,
{
    match AssertUnwindSafe(call).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(anyhow!(
            "collaborator panicked: {}",
            panic_message(payload.as_ref())
        )),
    }
}

/// Hand an instance back to its factory
pub(crate) async fn release<S>(factory: &dyn ServiceFactory<S>, service: Arc<S>) -> anyhow::Result<()>
where
    S: ?Sized + Send + Sync + 'static,
{
    guarded(async move {
        factory.unget_service(service).await;
        Ok::<_, anyhow::Error>(())
    })
    .await
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

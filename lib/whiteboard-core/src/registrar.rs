//! Registrar coordinating implementors, handlers and publishers
//!
//! The registrar holds the live sets and drives re-wiring:
//! - implementor changes refresh only that implementor's wiring
//! - handler and publisher changes refresh every wiring
//! - `snapshot` copies out the last outcome of every wiring and handler

use crate::catalog::Catalog;
use crate::config::RegistrarConfig;
use crate::endpoint::{EndpointRegistration, ImplementorDescriptor, ImplementorFactory, WiringOutcome};
use crate::event::RegistrationEvent;
use crate::handler::{HandlerDescriptor, HandlerFactory, HandlerRegistration};
use crate::metrics::RegistrarMetrics;
use crate::publisher::{EndpointPublisher, PublisherEntry};
use crate::{CoreError, Result};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info, warn};
use whiteboard_api::{PropertyBag, RuntimeSnapshot, ServiceId};

pub struct Registrar {
    config: RegistrarConfig,
    endpoints: RwLock<HashMap<ServiceId, Arc<EndpointRegistration>>>,
    catalog: Catalog,
    change_count: AtomicU64,
    metrics: Option<RegistrarMetrics>,
}

impl Registrar {
    /// Registrar with the default configuration and no metrics
    pub fn new() -> Self {
        Self {
            config: RegistrarConfig::default(),
            endpoints: RwLock::new(HashMap::new()),
            catalog: Catalog::new(),
            change_count: AtomicU64::new(0),
            metrics: None,
        }
    }

    pub fn with_config(config: RegistrarConfig) -> Result<Self> {
        let metrics = if config.metrics {
            Some(RegistrarMetrics::new()?)
        } else {
            None
        };
        Ok(Self {
            config,
            metrics,
            ..Self::new()
        })
    }

    pub fn config(&self) -> &RegistrarConfig {
        &self.config
    }

    pub fn metrics(&self) -> Option<&RegistrarMetrics> {
        self.metrics.as_ref()
    }

    /// Number of structural changes applied so far
    pub fn change_count(&self) -> u64 {
        self.change_count.load(Ordering::SeqCst)
    }

    fn changed(&self) {
        self.change_count.fetch_add(1, Ordering::SeqCst);
        if let Some(metrics) = &self.metrics {
            metrics.changes_total.inc();
        }
    }

    fn record(&self, outcome: &WiringOutcome) {
        if let Some(metrics) = &self.metrics {
            metrics.refresh_total.inc();
            if let Some(code) = outcome.failure_code() {
                metrics.record_failure(code);
            }
        }
    }

    /// Register an implementor, or replace the one with the same identity
    pub async fn implementor_registered(
        &self,
        descriptor: ImplementorDescriptor,
        factory: ImplementorFactory,
    ) -> WiringOutcome {
        let id = descriptor.id;
        debug!(implementor = %id, "Implementor registered");

        let outcome = loop {
            let registration = {
                let mut endpoints = self.endpoints.write().await;
                endpoints
                    .entry(id)
                    .or_insert_with(|| Arc::new(EndpointRegistration::new(id)))
                    .clone()
            };

            match registration
                .bind(descriptor.clone(), factory.clone(), &self.catalog)
                .await
            {
                Some(outcome) => {
                    self.check_current(&registration).await;
                    break outcome;
                }
                // Disposed while we waited for it; start over with a fresh one
                None => self.evict(&registration).await,
            }
        };

        self.record(&outcome);
        self.changed();
        outcome
    }

    /// Replace an implementor's properties and re-wire it
    pub async fn implementor_updated(
        &self,
        id: ServiceId,
        properties: PropertyBag,
    ) -> Result<WiringOutcome> {
        let registration = self.endpoint(id).await.ok_or(CoreError::ImplementorNotFound(id))?;
        let outcome = registration
            .update(properties, &self.catalog)
            .await
            .ok_or(CoreError::ImplementorNotFound(id))?;

        debug!(implementor = %id, "Implementor updated");
        self.record(&outcome);
        self.changed();
        Ok(outcome)
    }

    /// Unpublish and forget an implementor; unknown identities are ignored
    pub async fn implementor_unregistered(&self, id: ServiceId) {
        let Some(registration) = self.endpoint(id).await else {
            debug!(implementor = %id, "Ignoring unregistration of unknown implementor");
            return;
        };
        registration.dispose().await;
        self.evict(&registration).await;

        debug!(implementor = %id, "Implementor unregistered");
        self.changed();
    }

    /// Register a handler, or replace the one with the same identity
    pub async fn handler_registered(&self, descriptor: HandlerDescriptor, factory: HandlerFactory) {
        let id = descriptor.id;
        let registration = Arc::new(HandlerRegistration::new(descriptor, factory));
        let previous = self.catalog.insert_handler(registration).await;

        debug!(handler = %id, "Handler registered");
        self.refresh_all().await;
        if let Some(previous) = previous {
            previous.dispose().await;
        }
        self.changed();
    }

    /// Re-register a handler with a new descriptor, keeping its factory
    pub async fn handler_updated(&self, descriptor: HandlerDescriptor) -> Result<()> {
        let id = descriptor.id;
        let existing = self
            .catalog
            .handler(id)
            .await
            .ok_or(CoreError::HandlerNotFound(id))?;
        self.handler_registered(descriptor, existing.factory()).await;
        Ok(())
    }

    /// Remove a handler from every wiring and release it
    pub async fn handler_unregistered(&self, id: ServiceId) {
        let Some(registration) = self.catalog.remove_handler(id).await else {
            debug!(handler = %id, "Ignoring unregistration of unknown handler");
            return;
        };

        debug!(handler = %id, "Handler unregistered");
        self.refresh_all().await;
        registration.dispose().await;
        self.changed();
    }

    pub async fn publisher_registered(
        &self,
        id: ServiceId,
        rank: i32,
        publisher: Arc<dyn EndpointPublisher>,
    ) {
        info!(publisher = %id, rank, name = publisher.name(), "Publisher registered");
        self.catalog
            .insert_publisher(PublisherEntry { id, rank, publisher })
            .await;
        self.refresh_all().await;
        self.changed();
    }

    /// Change a publisher's rank
    pub async fn publisher_updated(&self, id: ServiceId, rank: i32) -> Result<()> {
        let entry = self
            .catalog
            .publisher(id)
            .await
            .ok_or(CoreError::PublisherNotFound(id))?;

        debug!(publisher = %id, rank, "Publisher updated");
        self.catalog
            .insert_publisher(PublisherEntry { rank, ..entry })
            .await;
        self.refresh_all().await;
        self.changed();
        Ok(())
    }

    pub async fn publisher_unregistered(&self, id: ServiceId) {
        if self.catalog.remove_publisher(id).await.is_none() {
            debug!(publisher = %id, "Ignoring unregistration of unknown publisher");
            return;
        }

        info!(publisher = %id, "Publisher unregistered");
        self.refresh_all().await;
        self.changed();
    }

    /// Apply one registration event
    pub async fn dispatch(&self, event: RegistrationEvent) -> Result<()> {
        match event {
            RegistrationEvent::ImplementorRegistered {
                descriptor,
                factory,
            } => {
                self.implementor_registered(descriptor, factory).await;
            }
            RegistrationEvent::ImplementorUpdated { id, properties } => {
                self.implementor_updated(id, properties).await?;
            }
            RegistrationEvent::ImplementorUnregistered { id } => {
                self.implementor_unregistered(id).await;
            }
            RegistrationEvent::HandlerRegistered {
                descriptor,
                factory,
            } => {
                self.handler_registered(descriptor, factory).await;
            }
            RegistrationEvent::HandlerUpdated { descriptor } => {
                self.handler_updated(descriptor).await?;
            }
            RegistrationEvent::HandlerUnregistered { id } => {
                self.handler_unregistered(id).await;
            }
            RegistrationEvent::PublisherRegistered {
                id,
                rank,
                publisher,
            } => {
                self.publisher_registered(id, rank, publisher).await;
            }
            RegistrationEvent::PublisherUpdated { id, rank } => {
                self.publisher_updated(id, rank).await?;
            }
            RegistrationEvent::PublisherUnregistered { id } => {
                self.publisher_unregistered(id).await;
            }
        }
        Ok(())
    }

    /// Apply events from a channel until every sender is dropped
    pub async fn run(&self, mut events: mpsc::Receiver<RegistrationEvent>) {
        while let Some(event) = events.recv().await {
            let description = format!("{event:?}");
            if let Err(e) = self.dispatch(event).await {
                warn!("Failed to apply {}: {}", description, e);
            }
        }
        debug!("Registration event channel closed");
    }

    /// Copy out the current state.
    ///
    /// Each wiring and handler is read atomically; the set as a whole is not.
    /// Compare `change_count` against [`Registrar::change_count`] to detect
    /// a stale snapshot.
    pub async fn snapshot(&self) -> RuntimeSnapshot {
        let mut snapshot = RuntimeSnapshot {
            change_count: self.change_count(),
            ..RuntimeSnapshot::default()
        };

        let registrations: Vec<_> = {
            let endpoints = self.endpoints.read().await;
            endpoints.values().cloned().collect()
        };
        for registration in registrations {
            match registration.outcome() {
                WiringOutcome::Published(endpoint) => snapshot.endpoints.push(endpoint),
                WiringOutcome::Failed(failed) => snapshot.failed_endpoints.push(failed),
                WiringOutcome::Unbound => {}
            }
        }

        for registration in self.catalog.handlers().await {
            match registration.view() {
                Ok(handler) => snapshot.handlers.push(handler),
                Err(failed) => snapshot.failed_handlers.push(failed),
            }
        }

        snapshot.endpoints.sort_by_key(|e| e.implementor.id);
        snapshot.failed_endpoints.sort_by_key(|e| e.implementor.id);
        snapshot.handlers.sort_by_key(|h| h.service.id);
        snapshot.failed_handlers.sort_by_key(|h| h.service.id);

        if let Some(metrics) = &self.metrics {
            metrics.observe(&snapshot);
        }
        snapshot
    }

    /// Unpublish every endpoint and release every handler
    pub async fn shutdown(&self) {
        let registrations: Vec<_> = {
            let endpoints = self.endpoints.read().await;
            endpoints.values().cloned().collect()
        };
        info!(endpoints = registrations.len(), "Shutting down registrar");
        join_all(registrations.iter().map(|r| r.dispose())).await;
        for registration in &registrations {
            self.evict(registration).await;
        }

        for registration in self.catalog.handlers().await {
            if let Some(handler) = self.catalog.remove_handler(registration.id()).await {
                handler.dispose().await;
            }
        }
        self.changed();
    }

    async fn endpoint(&self, id: ServiceId) -> Option<Arc<EndpointRegistration>> {
        let endpoints = self.endpoints.read().await;
        endpoints.get(&id).cloned()
    }

    /// Remove `registration` from the live set unless it was already replaced
    async fn evict(&self, registration: &Arc<EndpointRegistration>) {
        let mut endpoints = self.endpoints.write().await;
        if let Some(current) = endpoints.get(&registration.id()) {
            if Arc::ptr_eq(current, registration) {
                endpoints.remove(&registration.id());
            }
        }
    }

    /// A live registration must be the one in the live set
    async fn check_current(&self, registration: &Arc<EndpointRegistration>) {
        let id = registration.id();
        let orphaned = {
            let endpoints = self.endpoints.read().await;
            match endpoints.get(&id) {
                Some(current) => !Arc::ptr_eq(current, registration) && !registration.is_retired(),
                None => !registration.is_retired(),
            }
        };
        if orphaned {
            debug_assert!(!orphaned, "two live wirings for implementor {id}");
            error!(implementor = %id, "Two live wirings for one implementor; keeping the newest");
            registration.dispose().await;
        }
    }

    async fn refresh_all(&self) {
        let registrations: Vec<_> = {
            let endpoints = self.endpoints.read().await;
            endpoints.values().cloned().collect()
        };
        debug!(endpoints = registrations.len(), "Refreshing all endpoint wirings");

        let outcomes = if self.config.parallel_refresh {
            join_all(registrations.iter().map(|r| r.refresh(&self.catalog))).await
        } else {
            let mut outcomes = Vec::with_capacity(registrations.len());
            for registration in &registrations {
                outcomes.push(registration.refresh(&self.catalog).await);
            }
            outcomes
        };
        for outcome in outcomes.into_iter().flatten() {
            self.record(&outcome);
        }
    }
}

impl Default for Registrar {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::HandlerKind;
    use crate::testing::{RecordingPublisher, TestHandlerFactory, TestImplementorFactory};
    use std::time::Duration;
    use whiteboard_api::{EndpointFailure, HandlerFailure};

    const PUBLISHER: ServiceId = ServiceId(1000);

    fn implementor(id: u64, addr: &str) -> ImplementorDescriptor {
        ImplementorDescriptor::new(ServiceId(id), PropertyBag::new().with("addr", addr))
    }

    async fn registrar_with_publisher() -> (Registrar, Arc<RecordingPublisher>) {
        let registrar = Registrar::new();
        let publisher = RecordingPublisher::new();
        registrar
            .publisher_registered(PUBLISHER, 0, publisher.clone())
            .await;
        (registrar, publisher)
    }

    #[tokio::test]
    async fn test_cancelled_registration_is_still_disposed() {
        let registrar = Registrar::new();
        let publisher = RecordingPublisher::with_apply_delay(Duration::from_millis(200));
        registrar
            .publisher_registered(PUBLISHER, 0, publisher.clone())
            .await;
        let factory = TestImplementorFactory::new();

        let registering =
            registrar.implementor_registered(implementor(1, "/a"), factory.clone());
        let result = tokio::time::timeout(Duration::from_millis(50), registering).await;
        assert!(result.is_err());
        assert_eq!(publisher.live_count(), 1);

        registrar.implementor_unregistered(ServiceId(1)).await;

        assert!(publisher.live().is_empty());
        assert_eq!(factory.outstanding(), 0);
        let snapshot = registrar.snapshot().await;
        assert!(snapshot.endpoints.is_empty());
        assert!(snapshot.failed_endpoints.is_empty());
    }

    #[tokio::test]
    async fn test_round_trip() {
        let (registrar, publisher) = registrar_with_publisher().await;
        let handler_factory = TestHandlerFactory::new();

        registrar
            .implementor_registered(implementor(1, "/a"), TestImplementorFactory::new())
            .await;
        registrar
            .handler_registered(HandlerDescriptor::new(ServiceId(2)), handler_factory.clone())
            .await;

        let snapshot = registrar.snapshot().await;
        assert_eq!(snapshot.endpoints.len(), 1);
        let endpoint = snapshot.endpoint_at("/a").expect("endpoint at /a");
        assert_eq!(endpoint.handlers.len(), 1);
        assert_eq!(endpoint.handlers[0].service.id, ServiceId(2));
        assert!(snapshot.handler(ServiceId(2)).is_some());

        registrar.handler_unregistered(ServiceId(2)).await;
        let snapshot = registrar.snapshot().await;
        let endpoint = snapshot.endpoint_at("/a").expect("endpoint still published");
        assert!(endpoint.handlers.is_empty());
        assert!(snapshot.handlers.is_empty() && snapshot.failed_handlers.is_empty());
        assert_eq!(
            handler_factory.gets.load(Ordering::SeqCst),
            handler_factory.ungets.load(Ordering::SeqCst)
        );

        registrar.implementor_unregistered(ServiceId(1)).await;
        let snapshot = registrar.snapshot().await;
        assert!(snapshot.endpoints.is_empty());
        assert!(snapshot.failed_endpoints.is_empty());
        assert_eq!(publisher.live_count(), 0);
    }

    #[tokio::test]
    async fn test_highest_ranked_publisher_wins() {
        for reversed in [false, true] {
            let registrar = Registrar::new();
            let low = RecordingPublisher::new();
            let high = RecordingPublisher::new();
            let mut publishers = vec![
                (ServiceId(10), 0, low.clone()),
                (ServiceId(11), 10, high.clone()),
            ];
            if reversed {
                publishers.reverse();
            }

            registrar
                .implementor_registered(implementor(1, "/a"), TestImplementorFactory::new())
                .await;
            for (id, rank, publisher) in publishers {
                registrar.publisher_registered(id, rank, publisher).await;
            }

            let snapshot = registrar.snapshot().await;
            assert_eq!(snapshot.endpoint(ServiceId(1)).unwrap().publisher, ServiceId(11));
            assert_eq!(low.live_count(), 0);
            assert_eq!(high.live_count(), 1);
        }
    }

    #[tokio::test]
    async fn test_publisher_rank_update_moves_endpoint() {
        let registrar = Registrar::new();
        let first = RecordingPublisher::new();
        let second = RecordingPublisher::new();
        registrar.publisher_registered(ServiceId(10), 5, first.clone()).await;
        registrar.publisher_registered(ServiceId(11), 1, second.clone()).await;
        registrar
            .implementor_registered(implementor(1, "/a"), TestImplementorFactory::new())
            .await;
        assert_eq!(first.live_count(), 1);

        registrar.publisher_updated(ServiceId(11), 9).await.unwrap();

        assert_eq!(first.live_count(), 0);
        assert_eq!(second.live_count(), 1);
        assert!(matches!(
            registrar.publisher_updated(ServiceId(99), 1).await,
            Err(CoreError::PublisherNotFound(ServiceId(99)))
        ));
    }

    #[tokio::test]
    async fn test_snapshot_is_idempotent() {
        let (registrar, _publisher) = registrar_with_publisher().await;
        registrar
            .implementor_registered(implementor(1, "/a"), TestImplementorFactory::new())
            .await;
        registrar
            .implementor_registered(implementor(2, "/b"), TestImplementorFactory::failing())
            .await;
        registrar
            .handler_registered(
                HandlerDescriptor::new(ServiceId(3)).with_filter("(("),
                TestHandlerFactory::new(),
            )
            .await;

        let first = registrar.snapshot().await;
        let second = registrar.snapshot().await;
        assert_eq!(first, second);
        assert!(!second.is_stale(registrar.change_count()));
    }

    #[tokio::test]
    async fn test_unmatched_handler_reports_no_matching_endpoint() {
        let (registrar, _publisher) = registrar_with_publisher().await;
        registrar
            .handler_registered(HandlerDescriptor::new(ServiceId(5)), TestHandlerFactory::new())
            .await;

        let snapshot = registrar.snapshot().await;
        let failed = snapshot.failed_handler(ServiceId(5)).expect("failed handler");
        assert_eq!(failed.failure_code, HandlerFailure::NoMatchingEndpoint);
        assert!(snapshot.handlers.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_filter_never_matches() {
        let (registrar, _publisher) = registrar_with_publisher().await;
        registrar
            .handler_registered(
                HandlerDescriptor::new(ServiceId(5)).with_filter("XSYOJHF6&/8+#="),
                TestHandlerFactory::new(),
            )
            .await;
        registrar
            .implementor_registered(implementor(1, "/a"), TestImplementorFactory::new())
            .await;

        let snapshot = registrar.snapshot().await;
        assert!(snapshot.endpoint(ServiceId(1)).unwrap().handlers.is_empty());
        let failed = snapshot.failed_handler(ServiceId(5)).expect("failed handler");
        assert_eq!(failed.failure_code, HandlerFailure::InvalidFilter);
    }

    #[tokio::test]
    async fn test_deeply_nested_filter_is_reported_invalid() {
        let (registrar, _publisher) = registrar_with_publisher().await;
        let nested = format!("{}(a=b){}", "(!".repeat(10_000), ")".repeat(10_000));
        registrar
            .handler_registered(
                HandlerDescriptor::new(ServiceId(5)).with_filter(nested),
                TestHandlerFactory::new(),
            )
            .await;
        registrar
            .implementor_registered(implementor(1, "/a"), TestImplementorFactory::new())
            .await;

        let snapshot = registrar.snapshot().await;
        assert!(snapshot.endpoint(ServiceId(1)).unwrap().handlers.is_empty());
        let failed = snapshot.failed_handler(ServiceId(5)).expect("failed handler");
        assert_eq!(failed.failure_code, HandlerFailure::InvalidFilter);
    }

    #[tokio::test]
    async fn test_unobtainable_handler_is_reported_not_bound() {
        let (registrar, _publisher) = registrar_with_publisher().await;
        registrar
            .implementor_registered(implementor(1, "/a"), TestImplementorFactory::new())
            .await;
        registrar
            .handler_registered(HandlerDescriptor::new(ServiceId(5)), TestHandlerFactory::failing())
            .await;

        let snapshot = registrar.snapshot().await;
        assert!(snapshot.endpoint(ServiceId(1)).unwrap().handlers.is_empty());
        let failed = snapshot.failed_handler(ServiceId(5)).expect("failed handler");
        assert_eq!(failed.failure_code, HandlerFailure::ServiceNotGettable);
    }

    #[tokio::test]
    async fn test_unobtainable_implementor() {
        let (registrar, publisher) = registrar_with_publisher().await;
        let outcome = registrar
            .implementor_registered(implementor(1, "/a"), TestImplementorFactory::failing())
            .await;

        assert_eq!(outcome.failure_code(), Some(EndpointFailure::ServiceNotGettable));
        let snapshot = registrar.snapshot().await;
        assert!(snapshot.endpoint(ServiceId(1)).is_none());
        assert_eq!(
            snapshot.failed_endpoint(ServiceId(1)).unwrap().failure_code,
            EndpointFailure::ServiceNotGettable
        );
        assert!(publisher.events().is_empty());
    }

    #[tokio::test]
    async fn test_publishes_once_a_publisher_appears() {
        let registrar = Registrar::new();
        registrar
            .implementor_registered(implementor(1, "/a"), TestImplementorFactory::new())
            .await;
        let snapshot = registrar.snapshot().await;
        assert_eq!(
            snapshot.failed_endpoint(ServiceId(1)).unwrap().failure_code,
            EndpointFailure::PublishFailed
        );

        let publisher = RecordingPublisher::new();
        registrar.publisher_registered(PUBLISHER, 0, publisher.clone()).await;
        let snapshot = registrar.snapshot().await;
        assert!(snapshot.failed_endpoint(ServiceId(1)).is_none());
        assert_eq!(snapshot.endpoint(ServiceId(1)).unwrap().address, "/a");

        registrar.publisher_unregistered(PUBLISHER).await;
        assert_eq!(publisher.live_count(), 0);
        let snapshot = registrar.snapshot().await;
        assert_eq!(
            snapshot.failed_endpoint(ServiceId(1)).unwrap().failure_code,
            EndpointFailure::PublishFailed
        );
    }

    #[tokio::test]
    async fn test_rejected_handler_leaves_nothing_published() {
        let (registrar, publisher) = registrar_with_publisher().await;
        registrar
            .handler_registered(
                HandlerDescriptor::new(ServiceId(5)),
                TestHandlerFactory::of_kind(HandlerKind::Protocol("unsupported".to_string())),
            )
            .await;
        registrar
            .implementor_registered(implementor(1, "/a"), TestImplementorFactory::new())
            .await;

        let snapshot = registrar.snapshot().await;
        assert_eq!(
            snapshot.failed_endpoint(ServiceId(1)).unwrap().failure_code,
            EndpointFailure::SetHandlerFailed
        );
        assert_eq!(publisher.live_count(), 0);
    }

    #[tokio::test]
    async fn test_reregistration_unpublishes_previous_address() {
        let (registrar, publisher) = registrar_with_publisher().await;
        let first = TestImplementorFactory::new();
        registrar.implementor_registered(implementor(1, "/a"), first.clone()).await;
        registrar
            .implementor_registered(implementor(1, "/b"), TestImplementorFactory::new())
            .await;

        assert_eq!(first.outstanding(), 0);
        assert_eq!(publisher.live().get(&ServiceId(1)).map(String::as_str), Some("/b"));
        assert_eq!(publisher.duplicate_publications.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_implementor_update() {
        let (registrar, _publisher) = registrar_with_publisher().await;
        registrar
            .handler_registered(
                HandlerDescriptor::new(ServiceId(5)).with_filter("(addr=/b)"),
                TestHandlerFactory::new(),
            )
            .await;
        registrar
            .implementor_registered(implementor(1, "/a"), TestImplementorFactory::new())
            .await;

        let outcome = registrar
            .implementor_updated(ServiceId(1), PropertyBag::new().with("addr", "/b"))
            .await
            .unwrap();

        let WiringOutcome::Published(endpoint) = outcome else {
            panic!("expected publication");
        };
        assert_eq!(endpoint.address, "/b");
        assert_eq!(endpoint.handlers.len(), 1);
        assert!(matches!(
            registrar
                .implementor_updated(ServiceId(7), PropertyBag::new())
                .await,
            Err(CoreError::ImplementorNotFound(ServiceId(7)))
        ));
    }

    #[tokio::test]
    async fn test_handler_update_replaces_registration() {
        let (registrar, _publisher) = registrar_with_publisher().await;
        let factory = TestHandlerFactory::new();
        registrar
            .implementor_registered(implementor(1, "/a"), TestImplementorFactory::new())
            .await;
        registrar
            .handler_registered(HandlerDescriptor::new(ServiceId(5)), factory.clone())
            .await;

        registrar
            .handler_updated(HandlerDescriptor::new(ServiceId(5)).with_filter("(addr=/other)"))
            .await
            .unwrap();

        let snapshot = registrar.snapshot().await;
        assert!(snapshot.endpoint(ServiceId(1)).unwrap().handlers.is_empty());
        assert_eq!(factory.gets.load(Ordering::SeqCst), 1);
        assert_eq!(factory.ungets.load(Ordering::SeqCst), 1);
        assert!(registrar
            .handler_updated(HandlerDescriptor::new(ServiceId(6)))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_change_count_detects_stale_snapshot() {
        let (registrar, _publisher) = registrar_with_publisher().await;
        let before = registrar.snapshot().await;
        assert_eq!(before.change_count, 1);

        registrar
            .implementor_registered(implementor(1, "/a"), TestImplementorFactory::new())
            .await;
        registrar.implementor_unregistered(ServiceId(99)).await;

        assert_eq!(registrar.change_count(), 2);
        assert!(before.is_stale(registrar.change_count()));
    }

    #[tokio::test]
    async fn test_run_applies_channel_events() {
        let registrar = Registrar::new();
        let publisher = RecordingPublisher::new();
        let (tx, rx) = mpsc::channel(8);

        tx.send(RegistrationEvent::PublisherRegistered {
            id: PUBLISHER,
            rank: 0,
            publisher: publisher.clone(),
        })
        .await
        .unwrap();
        tx.send(RegistrationEvent::ImplementorRegistered {
            descriptor: implementor(1, "/a"),
            factory: TestImplementorFactory::new(),
        })
        .await
        .unwrap();
        tx.send(RegistrationEvent::ImplementorUpdated {
            id: ServiceId(2),
            properties: PropertyBag::new(),
        })
        .await
        .unwrap();
        drop(tx);

        registrar.run(rx).await;

        let snapshot = registrar.snapshot().await;
        assert_eq!(snapshot.endpoints.len(), 1);
        assert_eq!(publisher.live_count(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_releases_everything() {
        let (registrar, publisher) = registrar_with_publisher().await;
        let implementors = TestImplementorFactory::new();
        let handlers = TestHandlerFactory::new();
        registrar
            .handler_registered(HandlerDescriptor::new(ServiceId(5)), handlers.clone())
            .await;
        registrar.implementor_registered(implementor(1, "/a"), implementors.clone()).await;
        registrar.implementor_registered(implementor(2, "/b"), implementors.clone()).await;

        registrar.shutdown().await;

        assert_eq!(publisher.live_count(), 0);
        assert_eq!(implementors.outstanding(), 0);
        assert_eq!(
            handlers.gets.load(Ordering::SeqCst),
            handlers.ungets.load(Ordering::SeqCst)
        );
        let snapshot = registrar.snapshot().await;
        assert!(snapshot.endpoints.is_empty() && snapshot.handlers.is_empty());
    }

    #[tokio::test]
    async fn test_metrics_follow_snapshots() {
        let registrar = Registrar::with_config(RegistrarConfig {
            metrics: true,
            ..RegistrarConfig::default()
        })
        .unwrap();
        assert!(registrar.config().metrics);
        assert!(registrar.config().parallel_refresh);
        registrar
            .implementor_registered(implementor(1, "/a"), TestImplementorFactory::new())
            .await;
        registrar.snapshot().await;

        let metrics = registrar.metrics().expect("metrics enabled");
        assert_eq!(metrics.endpoints_failed.get(), 1);
        assert_eq!(metrics.refresh_total.get(), 1);
        let text = metrics.gather().unwrap();
        assert!(text.contains(r#"whiteboard_endpoint_failures_total{code="PublishFailed"} 1"#));
    }
}

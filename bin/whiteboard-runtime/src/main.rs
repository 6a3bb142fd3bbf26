use anyhow::{anyhow, Result};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use whiteboard_api::ServiceId;
use whiteboard_core::{Registrar, RegistrarConfig, RegistrationEvent};
use whiteboard_http::{HttpPublisher, HttpPublisherConfig};

mod config;
mod manifest;
mod services;

use config::{LogFormat, RuntimeConfig};
use manifest::Manifest;

const HTTP_PUBLISHER: ServiceId = ServiceId(0);

#[tokio::main]
async fn main() -> Result<()> {
    let config = RuntimeConfig::from_env()?;
    init_tracing(config.log_format);

    info!("Starting whiteboard-runtime...");
    info!(
        manifest = %config.manifest.display(),
        interval = ?config.poll_interval,
        "Watching manifest"
    );

    let registrar = Arc::new(Registrar::with_config(RegistrarConfig {
        metrics: true,
        ..RegistrarConfig::default()
    })?);
    let publisher = Arc::new(HttpPublisher::new(
        HttpPublisherConfig::default().with_base_url(config.base_url.clone()),
    )?);
    registrar
        .publisher_registered(HTTP_PUBLISHER, 0, publisher.clone())
        .await;

    let (events, receiver) = mpsc::channel(64);
    let runner = {
        let registrar = registrar.clone();
        tokio::spawn(async move { registrar.run(receiver).await })
    };

    let mut current = Manifest::default();
    loop {
        match poll(&config.manifest, &current, &events).await {
            Ok(next) => current = next,
            Err(e) => error!("Error polling manifest: {:#}", e),
        }

        tokio::select! {
            _ = tokio::time::sleep(config.poll_interval) => {}
            result = tokio::signal::ctrl_c() => {
                result?;
                info!("Shutdown signal received, exiting...");
                break;
            }
        }

        log_snapshot(&registrar).await;
        for route in publisher.routes().await {
            debug!(
                "Route {} -> implementor {} ({} handlers, since {})",
                route.context_path,
                route.implementor,
                route.handlers.len(),
                route.published_at
            );
        }
    }

    drop(events);
    runner.await?;
    registrar.shutdown().await;
    log_snapshot(&registrar).await;

    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

/// Load the manifest and deliver its differences from `current`
async fn poll(
    path: &Path,
    current: &Manifest,
    events: &mpsc::Sender<RegistrationEvent>,
) -> Result<Manifest> {
    let next = Manifest::load(path).await?;
    let changes = current.diff(&next);
    if !changes.is_empty() {
        info!("Manifest changed: {} registrations affected", changes.len());
    }

    for change in changes {
        let event = services::to_event(change);
        debug!("Delivering {:?}", event);
        events
            .send(event)
            .await
            .map_err(|_| anyhow!("registrar stopped accepting events"))?;
    }
    Ok(next)
}

async fn log_snapshot(registrar: &Registrar) {
    let snapshot = registrar.snapshot().await;
    info!(
        change_count = snapshot.change_count,
        endpoints = snapshot.endpoints.len(),
        failed_endpoints = snapshot.failed_endpoints.len(),
        handlers = snapshot.handlers.len(),
        failed_handlers = snapshot.failed_handlers.len(),
        "Runtime snapshot"
    );
    for failed in &snapshot.failed_endpoints {
        warn!(
            implementor = %failed.implementor.id,
            code = %failed.failure_code,
            "Endpoint failed: {}",
            failed.failure_message
        );
    }
    for failed in &snapshot.failed_handlers {
        debug!(
            handler = %failed.service.id,
            code = %failed.failure_code,
            "Handler not active: {}",
            failed.failure_message.as_deref().unwrap_or("-")
        );
    }

    match serde_json::to_string(&snapshot) {
        Ok(json) => debug!("Snapshot: {}", json),
        Err(e) => warn!("Failed to serialize snapshot: {}", e),
    }
    if let Some(metrics) = registrar.metrics() {
        match metrics.gather() {
            Ok(text) => debug!("Metrics:\n{}", text),
            Err(e) => warn!("Failed to gather metrics: {}", e),
        }
    }
}

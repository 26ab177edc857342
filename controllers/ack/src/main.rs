//! ACK Controller
//!
//! Cluster API infrastructure controller for Alibaba Cloud:
//! - ACKCluster: Network and control plane endpoint of a workload cluster
//! - ACKMachine: One ECS instance per Cluster API Machine
//!
//! Configuration is read from environment variables at startup.

mod backoff;
mod config;
mod controller;
mod error;
mod events;
mod metrics;
mod probes;
mod reconciler;
mod scope;
mod store;
mod watcher;
#[cfg(test)]
mod test_utils;

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use controller::Controller;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    // kube's rustls needs a process-wide crypto provider
    let _ = rustls::crypto::ring::default_provider().install_default();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting ACK Controller");

    let config = ControllerConfig::from_env()?;

    info!("Configuration:");
    info!("  Region: {}", config.region_id);
    info!("  Namespace: {}", config.watch_namespace.as_deref().unwrap_or("all namespaces"));
    info!("  Concurrency: {}", config.reconcile_concurrency);
    info!("  Cloud call timeout: {}s", config.cloud_call_timeout.as_secs());
    info!("  Probe address: {}", config.probe_addr);

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}

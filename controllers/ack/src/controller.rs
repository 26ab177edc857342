//! Main controller implementation.
//!
//! `Controller` wires the Kubernetes client, the ECS client and the
//! reconciler together and runs one watcher per infrastructure kind next to
//! the probe server.

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::events::KubeEventPublisher;
use crate::metrics::Metrics;
use crate::probes::{self, ProbeState};
use crate::reconciler::Reconciler;
use crate::store::KubeStore;
use crate::watcher::Watcher;
use ecs_client::{Credentials, EcsClient, EcsClientTrait, client::default_endpoint};
use kube::Client;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Main controller for ACKCluster and ACKMachine resources.
pub struct Controller {
    ack_cluster_watcher: JoinHandle<Result<(), ControllerError>>,
    ack_machine_watcher: JoinHandle<Result<(), ControllerError>>,
    probe_server: JoinHandle<Result<(), ControllerError>>,
}

fn ecs_client(config: &ControllerConfig) -> Result<EcsClient, ControllerError> {
    let ecs_endpoint = config
        .ecs_endpoint
        .clone()
        .unwrap_or_else(|| default_endpoint("ecs", &config.region_id));
    let vpc_endpoint = config
        .vpc_endpoint
        .clone()
        .unwrap_or_else(|| default_endpoint("vpc", &config.region_id));

    Ok(EcsClient::with_endpoints(
        config.region_id.clone(),
        ecs_endpoint,
        vpc_endpoint,
        Credentials {
            access_key_id: config.access_key_id.clone(),
            access_key_secret: config.access_key_secret.clone(),
        },
    )?)
}

fn joined(kind: &str, result: Result<Result<(), ControllerError>, tokio::task::JoinError>) -> Result<(), ControllerError> {
    result
        .map_err(|e| ControllerError::Watch(format!("{} task panicked: {}", kind, e)))?
        .map_err(|e| ControllerError::Watch(format!("{} task error: {}", kind, e)))
}

impl Controller {
    /// Creates a new controller instance.
    pub async fn new(config: ControllerConfig) -> Result<Self, ControllerError> {
        info!("Initializing ACK Controller");

        let kube_client = Client::try_default().await?;

        let ecs = ecs_client(&config)?;

        info!("Validating Alibaba Cloud credentials...");
        ecs.validate_credentials().await.map_err(|e| {
            error!("Failed to validate Alibaba Cloud credentials: {}", e);
            error!("Please ensure:");
            error!("  1. ALIBABA_CLOUD_ACCESS_KEY_ID and ALIBABA_CLOUD_ACCESS_KEY_SECRET are set correctly");
            error!("  2. The key has ECS and VPC permissions");
            error!("  3. Region {} is reachable", config.region_id);
            ControllerError::Ecs(e)
        })?;
        info!("Alibaba Cloud credentials validated");

        let metrics = Metrics::new()?;
        let reconciler = Arc::new(Reconciler::new(
            Arc::new(KubeStore::new(kube_client.clone())),
            Arc::new(ecs),
            Arc::new(KubeEventPublisher::new(kube_client.clone())),
            metrics.clone(),
            config.cloud_call_timeout,
            config.region_id.clone(),
        ));

        let watcher = Arc::new(Watcher::new(
            reconciler,
            kube_client,
            config.watch_namespace.clone(),
            config.reconcile_concurrency,
        ));

        let ack_cluster_watcher = {
            let watcher = Arc::clone(&watcher);
            tokio::spawn(async move { watcher.watch_ack_clusters().await })
        };
        let ack_machine_watcher = {
            let watcher = Arc::clone(&watcher);
            tokio::spawn(async move { watcher.watch_ack_machines().await })
        };

        let probe_state = ProbeState::new(metrics);
        let probe_server = {
            let state = probe_state.clone();
            let addr = config.probe_addr;
            tokio::spawn(async move { probes::serve(addr, state).await })
        };
        probe_state.set_ready(true);

        Ok(Self {
            ack_cluster_watcher,
            ack_machine_watcher,
            probe_server,
        })
    }

    /// Runs the controller until one of its tasks exits.
    pub async fn run(mut self) -> Result<(), ControllerError> {
        info!("ACK Controller running");

        // Every task is expected to run forever
        tokio::select! {
            result = &mut self.ack_cluster_watcher => joined("ACKCluster watcher", result),
            result = &mut self.ack_machine_watcher => joined("ACKMachine watcher", result),
            result = &mut self.probe_server => joined("Probe server", result),
        }
    }
}

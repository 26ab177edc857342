//! Cluster scope
//!
//! Wraps one ACKCluster and its owning Cluster for a single reconciliation.

use super::{patch::PatchHelper, required};
use crate::error::ControllerError;
use crate::store::{PatchOutcome, ResourceStore};
use crds::{ACKCluster, ACKClusterStatus, CLUSTER_FINALIZER, Cluster, has_paused_annotation};
use ecs_client::{LoadBalancerRequest, NetworkRequest, NetworkStatus};
use k8s_openapi::api::core::v1::ObjectReference;
use kube::{Resource, ResourceExt};
use std::sync::Arc;
use tracing::warn;

/// Inputs of `ClusterScope::new`; every field is required
#[derive(Default)]
pub struct ClusterScopeParams {
    pub store: Option<Arc<dyn ResourceStore>>,
    pub cluster: Option<Cluster>,
    pub ack_cluster: Option<ACKCluster>,
    /// Region used when the ACKCluster names none
    pub default_region: String,
}

pub struct ClusterScope {
    store: Arc<dyn ResourceStore>,
    pub cluster: Cluster,
    pub ack_cluster: ACKCluster,
    default_region: String,
    patch: PatchHelper<ACKCluster>,
    closed: bool,
}

impl ClusterScope {
    /// Opens a scope and snapshots the ACKCluster.
    pub fn new(params: ClusterScopeParams) -> Result<Self, ControllerError> {
        let store = required(params.store, "resource store")?;
        let cluster = required(params.cluster, "Cluster")?;
        let ack_cluster = required(params.ack_cluster, "ACKCluster")?;
        let patch = PatchHelper::new(&ack_cluster)?;
        Ok(Self {
            store,
            cluster,
            ack_cluster,
            default_region: params.default_region,
            patch,
            closed: false,
        })
    }

    pub fn name(&self) -> String {
        self.ack_cluster.name_any()
    }

    pub fn namespace(&self) -> String {
        self.ack_cluster.namespace().unwrap_or_default()
    }

    /// `namespace/name`, for logs
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace(), self.name())
    }

    pub fn region_id(&self) -> String {
        self.ack_cluster
            .spec
            .region_id
            .clone()
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| self.default_region.clone())
    }

    pub fn is_deleting(&self) -> bool {
        self.ack_cluster.metadata.deletion_timestamp.is_some()
    }

    pub fn is_paused(&self) -> bool {
        self.cluster.is_paused() || has_paused_annotation(&self.ack_cluster.metadata)
    }

    pub fn has_finalizer(&self) -> bool {
        super::has_finalizer(&self.ack_cluster.metadata, CLUSTER_FINALIZER)
    }

    pub fn add_finalizer(&mut self) -> bool {
        super::add_finalizer(&mut self.ack_cluster.metadata, CLUSTER_FINALIZER)
    }

    pub fn remove_finalizer(&mut self) -> bool {
        super::remove_finalizer(&mut self.ack_cluster.metadata, CLUSTER_FINALIZER)
    }

    fn status_mut(&mut self) -> &mut ACKClusterStatus {
        self.ack_cluster.status.get_or_insert_with(ACKClusterStatus::default)
    }

    pub fn is_ready(&self) -> bool {
        self.ack_cluster.status.as_ref().map(|s| s.ready).unwrap_or(false)
    }

    pub fn set_ready(&mut self, ready: bool) {
        self.status_mut().ready = ready;
    }

    /// Network the cluster asks for; a VPC already recorded in status wins
    /// over an empty spec so teardown still sees it.
    pub fn network_request(&self) -> NetworkRequest {
        let network = &self.ack_cluster.spec.network_spec;
        let vpc_id = network
            .vpc_id
            .clone()
            .or_else(|| self.ack_cluster.status.as_ref().and_then(|s| s.vpc_id.clone()));
        NetworkRequest {
            region_id: self.region_id(),
            vpc_id,
            vswitch_ids: network.all_vswitch_ids(),
        }
    }

    pub fn set_network_status(&mut self, network: NetworkStatus) {
        let status = self.status_mut();
        status.vpc_id = Some(network.vpc_id);
        status.vswitch_ids = network.vswitch_ids;
    }

    pub fn load_balancer_request(&self) -> LoadBalancerRequest {
        LoadBalancerRequest {
            region_id: self.region_id(),
            load_balancer_id: self.ack_cluster.status.as_ref().and_then(|s| s.intranet_slb_id.clone()),
        }
    }

    pub fn set_load_balancer(&mut self, load_balancer_id: Option<String>) {
        self.status_mut().intranet_slb_id = load_balancer_id;
    }

    /// Reference used as the subject of events
    pub fn object_ref(&self) -> ObjectReference {
        self.ack_cluster.object_ref(&())
    }

    /// Persists the changes made so far without closing the scope
    pub async fn patch_object(&mut self) -> Result<PatchOutcome, ControllerError> {
        self.patch.patch(self.store.as_ref(), &mut self.ack_cluster).await
    }

    /// Commits pending changes and ends the scope
    pub async fn close(mut self) -> Result<PatchOutcome, ControllerError> {
        self.closed = true;
        self.patch.patch(self.store.as_ref(), &mut self.ack_cluster).await
    }
}

impl Drop for ClusterScope {
    fn drop(&mut self) {
        if !self.closed {
            warn!("Cluster scope for {} dropped without close, changes discarded", self.key());
        }
    }
}

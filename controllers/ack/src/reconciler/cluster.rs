//! ACKCluster reconciliation
//!
//! Keeps the cluster network and API load balancer in place and gates
//! deletion of the ACKCluster on their teardown.

use super::{ReconcileOutcome, Reconciler};
use crate::error::ControllerError;
use crate::events::{actions, reasons};
use crate::scope::{first_error, ClusterScope, ClusterScopeParams};
use crds::capi_owner_name;
use kube::runtime::events::EventType;
use std::sync::Arc;
use tracing::{debug, info};

impl Reconciler {
    /// Reconciles the ACKCluster `namespace/name`.
    ///
    /// A missing ACKCluster or a missing owning Cluster ends the pass
    /// successfully; the next watch event brings the work back.
    pub async fn reconcile_ack_cluster(&self, namespace: &str, name: &str) -> Result<ReconcileOutcome, ControllerError> {
        let Some(ack_cluster) = self.store.get_ack_cluster(namespace, name).await? else {
            debug!("ACKCluster {}/{} not found, nothing to do", namespace, name);
            return Ok(ReconcileOutcome::Done);
        };

        let Some(cluster_name) = capi_owner_name(&ack_cluster.metadata, "Cluster") else {
            info!("Waiting for Cluster controller to set OwnerRef on ACKCluster {}/{}", namespace, name);
            return Ok(ReconcileOutcome::Done);
        };
        let Some(cluster) = self.store.get_cluster(namespace, &cluster_name).await? else {
            info!("Cluster {}/{} owning ACKCluster {} not found", namespace, cluster_name, name);
            return Ok(ReconcileOutcome::Done);
        };

        let mut scope = ClusterScope::new(ClusterScopeParams {
            store: Some(Arc::clone(&self.store)),
            cluster: Some(cluster),
            ack_cluster: Some(ack_cluster),
            default_region: self.default_region(),
        })?;

        let result = self.reconcile_cluster_scope(&mut scope).await;
        let closed = scope.close().await.map(|_| ());
        first_error(result, closed)
    }

    async fn reconcile_cluster_scope(&self, scope: &mut ClusterScope) -> Result<ReconcileOutcome, ControllerError> {
        if scope.is_paused() {
            info!("ACKCluster {} or its Cluster is paused, skipping", scope.key());
            return Ok(ReconcileOutcome::Done);
        }
        if scope.is_deleting() {
            return self.reconcile_cluster_delete(scope).await;
        }
        self.reconcile_cluster_normal(scope).await
    }

    async fn reconcile_cluster_normal(&self, scope: &mut ClusterScope) -> Result<ReconcileOutcome, ControllerError> {
        info!("Reconciling ACKCluster {}", scope.key());

        if scope.add_finalizer() {
            scope.patch_object().await?;
        }

        let network_request = scope.network_request();
        let network = match self
            .cloud_call("reconcile_network", self.ecs.reconcile_network(&network_request))
            .await
        {
            Ok(network) => network,
            Err(e) => {
                scope.set_ready(false);
                return Err(e);
            }
        };
        scope.set_network_status(network);

        let lb_request = scope.load_balancer_request();
        let load_balancer = match self
            .cloud_call("reconcile_load_balancer", self.ecs.reconcile_load_balancer(&lb_request))
            .await
        {
            Ok(id) => id,
            Err(e) => {
                scope.set_ready(false);
                return Err(e);
            }
        };
        scope.set_load_balancer(load_balancer);

        if !scope.is_ready() {
            scope.set_ready(true);
            info!("ACKCluster {} infrastructure is ready", scope.key());
            self.publish(
                &scope.object_ref(),
                EventType::Normal,
                reasons::INFRASTRUCTURE_READY,
                actions::RECONCILE,
                "Cluster network and load balancer are in place",
            )
            .await;
        }
        Ok(ReconcileOutcome::Done)
    }

    /// Tears down the load balancer and network, then releases the finalizer.
    /// Safe to repeat: both teardown calls accept already removed resources.
    async fn reconcile_cluster_delete(&self, scope: &mut ClusterScope) -> Result<ReconcileOutcome, ControllerError> {
        if !scope.has_finalizer() {
            debug!("ACKCluster {} is deleting and carries no finalizer", scope.key());
            return Ok(ReconcileOutcome::Done);
        }
        info!("Reconciling ACKCluster {} deletion", scope.key());

        let lb_request = scope.load_balancer_request();
        self.cloud_call("delete_load_balancer", self.ecs.delete_load_balancer(&lb_request))
            .await?;
        let network_request = scope.network_request();
        self.cloud_call("delete_network", self.ecs.delete_network(&network_request))
            .await?;

        scope.remove_finalizer();
        Ok(ReconcileOutcome::Done)
    }
}

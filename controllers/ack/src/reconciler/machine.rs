//! ACKMachine reconciliation
//!
//! Get-or-create of the ECS instance behind an ACKMachine, projection of its
//! state onto the machine status, and finalizer-gated teardown.

use super::instance_state::project;
use super::{ReconcileOutcome, Reconciler, NOT_READY_REQUEUE};
use crate::error::ControllerError;
use crate::events::{actions, reasons};
use crate::scope::{first_error, MachineScope, MachineScopeParams};
use crds::{capi_owner_name, ACKMachine, InstanceState, MachineStatusError};
use ecs_client::Instance;
use kube::runtime::events::EventType;
use std::sync::Arc;
use tracing::{debug, info, warn};

impl Reconciler {
    /// Reconciles the ACKMachine `namespace/name`.
    ///
    /// Resolves ACKMachine -> Machine (owner reference) -> Cluster (cluster
    /// name label) -> ACKCluster (infrastructure reference). Any missing link
    /// ends the pass successfully.
    pub async fn reconcile_ack_machine(&self, namespace: &str, name: &str) -> Result<ReconcileOutcome, ControllerError> {
        let Some(ack_machine) = self.store.get_ack_machine(namespace, name).await? else {
            debug!("ACKMachine {}/{} not found, nothing to do", namespace, name);
            return Ok(ReconcileOutcome::Done);
        };
        let Some(params) = self.resolve_machine(namespace, ack_machine).await? else {
            return Ok(ReconcileOutcome::Done);
        };

        let mut scope = MachineScope::new(params)?;
        let result = self.reconcile_machine_scope(&mut scope).await;
        let closed = scope.close().await.map(|_| ());
        first_error(result, closed)
    }

    async fn resolve_machine(
        &self,
        namespace: &str,
        ack_machine: ACKMachine,
    ) -> Result<Option<MachineScopeParams>, ControllerError> {
        let name = ack_machine.metadata.name.clone().unwrap_or_default();

        let Some(machine_name) = capi_owner_name(&ack_machine.metadata, "Machine") else {
            info!("Waiting for Machine controller to set OwnerRef on ACKMachine {}/{}", namespace, name);
            return Ok(None);
        };
        let Some(machine) = self.store.get_machine(namespace, &machine_name).await? else {
            info!("Machine {}/{} owning ACKMachine {} not found", namespace, machine_name, name);
            return Ok(None);
        };

        let Some(cluster_name) = machine.cluster_name().map(str::to_string) else {
            info!("Machine {}/{} is not associated with a Cluster yet", namespace, machine_name);
            return Ok(None);
        };
        let Some(cluster) = self.store.get_cluster(namespace, &cluster_name).await? else {
            info!("Cluster {}/{} of ACKMachine {} not found", namespace, cluster_name, name);
            return Ok(None);
        };

        let ack_cluster_name = cluster
            .spec
            .infrastructure_ref
            .as_ref()
            .map(|r| r.name.clone())
            .unwrap_or_else(|| cluster_name.clone());
        let Some(ack_cluster) = self.store.get_ack_cluster(namespace, &ack_cluster_name).await? else {
            info!("ACKCluster {}/{} of ACKMachine {} not found", namespace, ack_cluster_name, name);
            return Ok(None);
        };

        Ok(Some(MachineScopeParams {
            store: Some(Arc::clone(&self.store)),
            cluster: Some(cluster),
            machine: Some(machine),
            ack_cluster: Some(ack_cluster),
            ack_machine: Some(ack_machine),
            default_region: self.default_region(),
        }))
    }

    async fn reconcile_machine_scope(&self, scope: &mut MachineScope) -> Result<ReconcileOutcome, ControllerError> {
        if scope.is_paused() {
            info!("ACKMachine {} or its Cluster is paused, skipping", scope.key());
            return Ok(ReconcileOutcome::Done);
        }
        if scope.is_deleting() {
            return self.reconcile_machine_delete(scope).await;
        }
        self.reconcile_machine_normal(scope).await
    }

    async fn reconcile_machine_normal(&self, scope: &mut MachineScope) -> Result<ReconcileOutcome, ControllerError> {
        info!("Reconciling ACKMachine {}", scope.key());

        if scope.has_failed() {
            debug!("ACKMachine {} has failed ({:?}), not touching it", scope.key(), scope.failure());
            return Ok(ReconcileOutcome::Done);
        }

        // Must be persisted before any instance can exist.
        if scope.add_finalizer() {
            scope.patch_object().await?;
        }

        if !scope.cluster_infrastructure_ready() {
            info!("Cluster infrastructure of ACKMachine {} is not ready yet", scope.key());
            return Ok(ReconcileOutcome::Done);
        }
        let Some(secret_name) = scope.bootstrap_data_secret_name() else {
            info!("Bootstrap data secret reference of ACKMachine {} is not yet available", scope.key());
            return Ok(ReconcileOutcome::Done);
        };
        let Some(user_data) = self.store.get_bootstrap_data(&scope.namespace(), &secret_name).await? else {
            info!("Bootstrap data secret {} of ACKMachine {} is not yet populated", secret_name, scope.key());
            return Ok(ReconcileOutcome::Done);
        };

        let Some(instance) = self.get_or_create_instance(scope, user_data).await? else {
            let message = format!("ECS instance of ACKMachine {} cannot be found", scope.key());
            warn!("{}", message);
            scope.set_failure(MachineStatusError::UpdateMachineError, message.clone());
            self.publish(&scope.object_ref(), EventType::Warning, reasons::INSTANCE_NOT_FOUND, actions::RECONCILE, message)
                .await;
            return Ok(ReconcileOutcome::Done);
        };

        if !scope.set_provider_id(&instance.id) {
            let message = format!(
                "ACKMachine {} has provider ID {} but its ECS instance is {}",
                scope.key(),
                scope.current_provider_id().unwrap_or_default(),
                instance.id
            );
            warn!("{}", message);
            scope.set_failure(MachineStatusError::UpdateMachineError, message.clone());
            self.publish(&scope.object_ref(), EventType::Warning, reasons::PROVIDER_ID_MISMATCH, actions::RECONCILE, message)
                .await;
            return Ok(ReconcileOutcome::Done);
        }
        scope.set_instance_id(&instance.id);
        scope.set_addresses(&instance);

        let state = InstanceState::parse(&instance.state);
        if scope.instance_state().as_ref() != Some(&state) {
            info!("ECS instance {} of ACKMachine {} is now {}", instance.id, scope.key(), state);
            self.publish(
                &scope.object_ref(),
                EventType::Normal,
                reasons::INSTANCE_STATE_CHANGED,
                actions::RECONCILE,
                format!("Instance {} state changed to {}", instance.id, state),
            )
            .await;
            scope.set_instance_state(state.clone());
        }

        let projection = project(&state);
        scope.set_ready(projection.ready);
        if let Some((reason, note)) = projection.warning {
            warn!("ACKMachine {}: {}", scope.key(), note);
            self.publish(&scope.object_ref(), EventType::Warning, reason, actions::RECONCILE, note).await;
        }
        if let Some((reason, message)) = projection.failure {
            scope.set_failure(reason, message);
            return Ok(ReconcileOutcome::Done);
        }

        if projection.ready || state == InstanceState::Terminated {
            Ok(ReconcileOutcome::Done)
        } else {
            Ok(ReconcileOutcome::RequeueAfter(NOT_READY_REQUEUE))
        }
    }

    /// Looks the instance up by recorded id or machine tag and creates it only
    /// when nothing is found. `None` means neither step produced an instance.
    async fn get_or_create_instance(
        &self,
        scope: &MachineScope,
        user_data: Vec<u8>,
    ) -> Result<Option<Instance>, ControllerError> {
        let lookup = scope.lookup();
        if let Some(existing) = self.cloud_call("find_instance", self.ecs.find_instance(&lookup)).await? {
            debug!("Found ECS instance {} for ACKMachine {}", existing.id, scope.key());
            return Ok(Some(existing));
        }

        let request = scope.run_instance_request(Some(user_data));
        let created = self.cloud_call("run_instance", self.ecs.run_instance(&request)).await?;
        if let Some(instance) = &created {
            info!("Created ECS instance {} for ACKMachine {}", instance.id, scope.key());
            self.metrics.record_instance_created();
            self.publish(
                &scope.object_ref(),
                EventType::Normal,
                reasons::INSTANCE_CREATED,
                actions::CREATE,
                format!("Created ECS instance {}", instance.id),
            )
            .await;
        }
        Ok(created)
    }

    /// Terminates the instance if one is still alive, then releases the
    /// finalizer. An instance that is already gone is not an error.
    async fn reconcile_machine_delete(&self, scope: &mut MachineScope) -> Result<ReconcileOutcome, ControllerError> {
        if !scope.has_finalizer() {
            debug!("ACKMachine {} is deleting and carries no finalizer", scope.key());
            return Ok(ReconcileOutcome::Done);
        }
        info!("Reconciling ACKMachine {} deletion", scope.key());

        match self.find_for_delete(scope).await? {
            Some(instance) if !InstanceState::parse(&instance.state).is_terminal() => {
                let region = scope.region_id();
                self.cloud_call("terminate_instance", self.ecs.terminate_instance(&region, &instance.id))
                    .await?;
                info!("Terminated ECS instance {} of ACKMachine {}", instance.id, scope.key());
                self.publish(
                    &scope.object_ref(),
                    EventType::Normal,
                    reasons::INSTANCE_TERMINATED,
                    actions::DELETE,
                    format!("Terminated ECS instance {}", instance.id),
                )
                .await;
            }
            Some(instance) => debug!("ECS instance {} is already {}", instance.id, instance.state),
            None => debug!("No ECS instance left for ACKMachine {}", scope.key()),
        }

        scope.remove_finalizer();
        Ok(ReconcileOutcome::Done)
    }

    /// The recorded instance id may name an instance that is long gone while
    /// another one still carries the machine tag, so fall back to the tag.
    async fn find_for_delete(&self, scope: &MachineScope) -> Result<Option<Instance>, ControllerError> {
        let lookup = scope.lookup();
        if let Some(instance) = self.cloud_call("find_instance", self.ecs.find_instance(&lookup)).await? {
            return Ok(Some(instance));
        }
        if lookup.instance_id.is_none() {
            return Ok(None);
        }
        let by_tag = scope.tag_lookup();
        self.cloud_call("find_instance", self.ecs.find_instance(&by_tag)).await
    }
}

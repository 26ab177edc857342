//! Machine scope
//!
//! Wraps one ACKMachine together with the objects it is resolved through:
//! the owning Machine, that machine's Cluster and the Cluster's ACKCluster.
//! Only the ACKMachine is ever written.

use super::{patch::PatchHelper, required};
use crate::error::ControllerError;
use crate::store::{PatchOutcome, ResourceStore};
use crds::{
    ACKCluster, ACKMachine, ACKMachineStatus, Cluster, FailureState, InstanceState, Machine, MachineAddress,
    MachineStatusError, MACHINE_FINALIZER, has_paused_annotation, provider_id,
};
use ecs_client::{
    machine_tag_value, DataDiskRequest, Instance, InstanceLookup, RunInstanceRequest, SystemDiskRequest,
    MACHINE_TAG_KEY,
};
use k8s_openapi::api::core::v1::ObjectReference;
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Inputs of `MachineScope::new`; everything but `default_region` is required
#[derive(Default)]
pub struct MachineScopeParams {
    pub store: Option<Arc<dyn ResourceStore>>,
    pub cluster: Option<Cluster>,
    pub machine: Option<Machine>,
    pub ack_cluster: Option<ACKCluster>,
    pub ack_machine: Option<ACKMachine>,
    pub default_region: String,
}

pub struct MachineScope {
    store: Arc<dyn ResourceStore>,
    pub cluster: Cluster,
    pub machine: Machine,
    pub ack_cluster: ACKCluster,
    pub ack_machine: ACKMachine,
    default_region: String,
    patch: PatchHelper<ACKMachine>,
    closed: bool,
}

impl MachineScope {
    pub fn new(params: MachineScopeParams) -> Result<Self, ControllerError> {
        let store = required(params.store, "resource store")?;
        let cluster = required(params.cluster, "Cluster")?;
        let machine = required(params.machine, "Machine")?;
        let ack_cluster = required(params.ack_cluster, "ACKCluster")?;
        let ack_machine = required(params.ack_machine, "ACKMachine")?;
        let patch = PatchHelper::new(&ack_machine)?;
        Ok(Self {
            store,
            cluster,
            machine,
            ack_cluster,
            ack_machine,
            default_region: params.default_region,
            patch,
            closed: false,
        })
    }

    pub fn name(&self) -> String {
        self.ack_machine.name_any()
    }

    pub fn namespace(&self) -> String {
        self.ack_machine.namespace().unwrap_or_default()
    }

    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace(), self.name())
    }

    /// Machine region, else the cluster region, else the controller default
    pub fn region_id(&self) -> String {
        [&self.ack_machine.spec.region_id, &self.ack_cluster.spec.region_id]
            .into_iter()
            .flatten()
            .find(|r| !r.is_empty())
            .cloned()
            .unwrap_or_else(|| self.default_region.clone())
    }

    pub fn is_deleting(&self) -> bool {
        self.ack_machine.metadata.deletion_timestamp.is_some()
    }

    pub fn is_paused(&self) -> bool {
        self.cluster.is_paused() || has_paused_annotation(&self.ack_machine.metadata)
    }

    pub fn failure(&self) -> FailureState {
        self.ack_machine
            .status
            .as_ref()
            .map(ACKMachineStatus::failure)
            .unwrap_or(FailureState::Active)
    }

    pub fn has_failed(&self) -> bool {
        self.ack_machine.has_failed()
    }

    pub fn has_finalizer(&self) -> bool {
        super::has_finalizer(&self.ack_machine.metadata, MACHINE_FINALIZER)
    }

    pub fn add_finalizer(&mut self) -> bool {
        super::add_finalizer(&mut self.ack_machine.metadata, MACHINE_FINALIZER)
    }

    pub fn remove_finalizer(&mut self) -> bool {
        super::remove_finalizer(&mut self.ack_machine.metadata, MACHINE_FINALIZER)
    }

    pub fn cluster_infrastructure_ready(&self) -> bool {
        self.cluster.infrastructure_ready()
    }

    pub fn bootstrap_data_secret_name(&self) -> Option<String> {
        self.machine.bootstrap_data_secret_name().map(str::to_string)
    }

    fn status(&self) -> Option<&ACKMachineStatus> {
        self.ack_machine.status.as_ref()
    }

    fn status_mut(&mut self) -> &mut ACKMachineStatus {
        self.ack_machine.status.get_or_insert_with(ACKMachineStatus::default)
    }

    pub fn instance_id(&self) -> Option<String> {
        self.status().and_then(|s| s.instance_id.clone())
    }

    /// How to find this machine's instance: the recorded id if any, else the machine tag
    pub fn lookup(&self) -> InstanceLookup {
        InstanceLookup::for_machine(self.region_id(), &self.namespace(), &self.name())
            .with_instance_id(self.instance_id())
    }

    /// RunInstances parameters for this machine.
    ///
    /// Tags are the cluster tags overlaid with the machine tags, plus the
    /// identifying machine tag. The resource UID is the client token.
    pub fn run_instance_request(&self, user_data: Option<Vec<u8>>) -> RunInstanceRequest {
        let spec = &self.ack_machine.spec;
        let network = &spec.machine_network_spec;
        let volumes = &spec.machine_volume_spec;

        let mut tags: BTreeMap<String, String> = BTreeMap::new();
        for tag in self.ack_cluster.spec.tags.iter().chain(spec.tags.iter()) {
            tags.insert(tag.key.clone(), tag.value.clone());
        }
        tags.insert(MACHINE_TAG_KEY.to_string(), machine_tag_value(&self.namespace(), &self.name()));

        RunInstanceRequest {
            region_id: self.region_id(),
            zone_id: Some(spec.zone_id.clone()).filter(|z| !z.is_empty()),
            instance_type: spec.instance_type.clone(),
            image_id: spec.image_id.clone(),
            instance_name: spec.instance_name.clone().or_else(|| Some(self.name())),
            description: spec.description.clone(),
            io_optimized: spec.io_optimized.clone(),
            security_group_id: network.security_group_id.clone(),
            vswitch_id: network.vswitch_id.clone(),
            private_ip_address: network.private_ip_address.clone(),
            internet_max_bandwidth_in: network.internet_max_bandwidth_in,
            internet_max_bandwidth_out: network.internet_max_bandwidth_out,
            internet_charge_type: network.internet_charge_type.clone(),
            system_disk: SystemDiskRequest {
                size: volumes.system_disk.size,
                category: volumes.system_disk.category.clone(),
                disk_name: volumes.system_disk.disk_name.clone(),
                description: volumes.system_disk.description.clone(),
                performance_level: volumes.system_disk.performance_level.clone(),
                auto_snapshot_policy_id: volumes.system_disk.auto_snapshot_policy_id.clone(),
            },
            data_disks: volumes
                .data_disks
                .iter()
                .map(|d| DataDiskRequest {
                    size: d.size,
                    snapshot_id: d.snapshot_id.clone(),
                    category: d.category.clone(),
                    encrypted: d.encrypted,
                    kms_key_id: d.kms_key_id.clone(),
                    disk_name: d.disk_name.clone(),
                    description: d.description.clone(),
                    delete_with_instance: d.delete_with_instance,
                    performance_level: d.performance_level.clone(),
                    auto_snapshot_policy_id: d.auto_snapshot_policy_id.clone(),
                })
                .collect(),
            instance_charge_type: spec.instance_charge_type.clone(),
            auto_renew: spec.auto_renew,
            auto_renew_period: spec.auto_renew_period,
            user_data,
            tags,
            client_token: self.ack_machine.uid(),
        }
    }

    pub fn set_instance_id(&mut self, instance_id: &str) {
        self.status_mut().instance_id = Some(instance_id.to_string());
    }

    pub fn current_provider_id(&self) -> Option<&str> {
        self.ack_machine.spec.provider_id.as_deref()
    }

    /// Sets `spec.providerID` from the instance id, once. Returns false and
    /// leaves the field untouched when it already names another instance.
    pub fn set_provider_id(&mut self, instance_id: &str) -> bool {
        let wanted = provider_id(instance_id);
        match self.current_provider_id() {
            Some(current) => current == wanted,
            None => {
                debug!("Setting provider ID of {} to {}", self.key(), wanted);
                self.ack_machine.spec.provider_id = Some(wanted);
                true
            }
        }
    }

    /// Lookup by the machine tag alone, ignoring any recorded instance id
    pub fn tag_lookup(&self) -> InstanceLookup {
        InstanceLookup::for_machine(self.region_id(), &self.namespace(), &self.name())
    }

    pub fn instance_state(&self) -> Option<InstanceState> {
        self.status().and_then(|s| s.instance_state.clone())
    }

    pub fn set_instance_state(&mut self, state: InstanceState) {
        self.status_mut().instance_state = Some(state);
    }

    pub fn is_ready(&self) -> bool {
        self.status().map(|s| s.ready).unwrap_or(false)
    }

    pub fn set_ready(&mut self, ready: bool) {
        self.status_mut().ready = ready;
    }

    /// Mirrors the instance's private and public addresses
    pub fn set_addresses(&mut self, instance: &Instance) {
        let addresses = instance
            .private_ip_addresses
            .iter()
            .map(MachineAddress::internal_ip)
            .chain(instance.public_ip_addresses.iter().map(MachineAddress::external_ip))
            .collect();
        self.status_mut().addresses = addresses;
    }

    /// Records a terminal failure. Both fields are always written together.
    pub fn set_failure(&mut self, reason: MachineStatusError, message: impl Into<String>) {
        let status = self.status_mut();
        status.failure_reason = Some(reason);
        status.failure_message = Some(message.into());
        status.ready = false;
    }

    pub fn object_ref(&self) -> ObjectReference {
        self.ack_machine.object_ref(&())
    }

    /// Persists the changes made so far without closing the scope
    pub async fn patch_object(&mut self) -> Result<PatchOutcome, ControllerError> {
        self.patch.patch(self.store.as_ref(), &mut self.ack_machine).await
    }

    /// Commits pending changes and ends the scope
    pub async fn close(mut self) -> Result<PatchOutcome, ControllerError> {
        self.closed = true;
        self.patch.patch(self.store.as_ref(), &mut self.ack_machine).await
    }
}

impl Drop for MachineScope {
    fn drop(&mut self) {
        if !self.closed {
            warn!("Machine scope for {} dropped without close, changes discarded", self.key());
        }
    }
}

//! ACKMachine Custom Resource Definition
//!
//! One ECS instance backing one Kubernetes node.
//! See https://help.aliyun.com/document_detail/63440.html for the meaning of
//! the instance fields.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use crate::{FailureState, InstanceState, MachineStatusError, Tag};

/// ACKMachineSpec defines the desired state of ACKMachine
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1alpha3",
    kind = "ACKMachine",
    namespaced,
    status = "ACKMachineStatus",
    shortname = "ackm"
)]
#[serde(rename_all = "camelCase")]
pub struct ACKMachineSpec {
    /// Provider ID of the backing instance (`ack:////<instance-id>`), set by the controller
    #[serde(default, rename = "providerID", skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,

    /// Alibaba Cloud cluster id this machine joins
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_id: Option<String>,

    /// Region, defaults to the ACKCluster region
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region_id: Option<String>,

    #[serde(default)]
    pub zone_id: String,

    /// Instance type, e.g. "ecs.g6.large"
    pub instance_type: String,

    /// Instance name, defaults to the resource name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// "none" or "optimized"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub io_optimized: Option<String>,

    pub image_id: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<Tag>,

    #[serde(default)]
    pub machine_network_spec: MachineNetworkSpec,

    #[serde(default)]
    pub machine_volume_spec: MachineVolumeSpec,

    /// PrePaid or PostPaid
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_charge_type: Option<String>,

    /// Renew automatically, only honoured for PrePaid instances
    #[serde(default)]
    pub auto_renew: bool,

    /// Renewal period, required when autoRenew is set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_renew_period: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MachineNetworkSpec {
    /// Security group, which also decides the network type of the instance
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_group_id: Option<String>,

    /// VSwitch to attach to, required for VPC security groups
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vswitch_id: Option<String>,

    /// Inbound public bandwidth limit in Mbit/s
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internet_max_bandwidth_in: Option<i64>,

    /// Outbound public bandwidth limit in Mbit/s
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internet_max_bandwidth_out: Option<i64>,

    /// PayByBandwidth or PayByTraffic
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internet_charge_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_ip_address: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MachineVolumeSpec {
    #[serde(default)]
    pub system_disk: SystemDisk,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data_disks: Vec<DataDisk>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SystemDisk {
    /// Size in GiB
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// ESSD performance level (PL0..PL3)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub performance_level: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_snapshot_policy_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DataDisk {
    /// Size in GiB
    pub size: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshot_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kms_key_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_with_instance: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub performance_level: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_snapshot_policy_id: Option<String>,
}

/// ACKMachineStatus defines the observed state of ACKMachine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ACKMachineStatus {
    /// The instance is running and may join the cluster
    #[serde(default)]
    pub ready: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_id: Option<String>,

    /// ECS instance id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,

    /// Last observed provider state of the instance
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(with = "Option<String>")]
    pub instance_state: Option<InstanceState>,

    /// Addresses reported by the provider
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addresses: Vec<MachineAddress>,

    /// Terminal problem reason. Set only by the controller, cleared only by recreation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<MachineStatusError>,

    /// Terminal problem detail, human readable
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_message: Option<String>,
}

impl ACKMachineStatus {
    /// Reads the two failure fields as one state.
    pub fn failure(&self) -> FailureState {
        if self.failure_reason.is_none() && self.failure_message.is_none() {
            FailureState::Active
        } else {
            FailureState::Failed {
                reason: self.failure_reason,
                message: self.failure_message.clone(),
            }
        }
    }
}

impl ACKMachine {
    /// True once a terminal failure has been recorded
    pub fn has_failed(&self) -> bool {
        self.status
            .as_ref()
            .map(|s| s.failure().is_failed())
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MachineAddress {
    /// InternalIP, ExternalIP, InternalDNS, ExternalDNS or Hostname
    #[serde(rename = "type")]
    pub address_type: String,

    pub address: String,
}

impl MachineAddress {
    pub fn internal_ip(address: impl Into<String>) -> Self {
        Self { address_type: "InternalIP".to_string(), address: address.into() }
    }

    pub fn external_ip(address: impl Into<String>) -> Self {
        Self { address_type: "ExternalIP".to_string(), address: address.into() }
    }
}

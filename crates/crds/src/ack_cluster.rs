//! ACKCluster Custom Resource Definition
//!
//! Cluster-level infrastructure for a Cluster API cluster running on Alibaba
//! Cloud: control-plane endpoint, network, shared infra.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use crate::Tag;

/// ACKClusterSpec defines the desired state of ACKCluster
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "infrastructure.cluster.x-k8s.io",
    version = "v1alpha3",
    kind = "ACKCluster",
    namespaced,
    status = "ACKClusterStatus",
    shortname = "ackc"
)]
#[serde(rename_all = "camelCase")]
pub struct ACKClusterSpec {
    /// Endpoint used to communicate with the control plane
    #[serde(default)]
    pub control_plane_endpoint: APIEndpoint,

    /// Name of the managed cluster in Alibaba Cloud
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_name: Option<String>,

    /// Cluster type (e.g. "Kubernetes", "ManagedKubernetes")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_type: Option<String>,

    /// Region the cluster lives in (e.g. "cn-hangzhou")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region_id: Option<String>,

    /// Kubernetes version
    #[serde(default)]
    pub kubernetes_version: String,

    /// CPU policy (none / static)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_policy: Option<String>,

    /// Instance type of control-plane nodes
    #[serde(default)]
    pub master_instance_type: String,

    /// Instance type of worker nodes
    #[serde(default)]
    pub worker_instance_type: String,

    /// Number of worker nodes
    #[serde(default)]
    pub nodes_num: i64,

    /// Login settings for nodes
    #[serde(default)]
    pub login_spec: LoginSpec,

    /// Disk settings for nodes
    #[serde(default)]
    pub volume_spec: VolumeSpec,

    /// Network settings
    #[serde(default)]
    pub network_spec: NetworkSpec,

    /// Cluster addons
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addons: Vec<Addon>,

    /// Tags applied to every resource created for this cluster
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<Tag>,
}

/// Host/port pair of an API endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct APIEndpoint {
    /// Hostname or IP
    #[serde(default)]
    pub host: String,

    /// Port
    #[serde(default)]
    pub port: i32,
}

impl APIEndpoint {
    /// True when neither host nor port has been set
    pub fn is_zero(&self) -> bool {
        self.host.is_empty() && self.port == 0
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LoginSpec {
    /// Name of the SSH key pair
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_pair: Option<String>,

    /// Login password (mutually exclusive with keyPair)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login_password: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSpec {
    #[serde(default)]
    pub master_system_disk: ClusterSystemDisk,

    #[serde(default)]
    pub worker_system_disk: ClusterSystemDisk,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data_disks: Vec<ClusterDataDisk>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSystemDisk {
    /// cloud / cloud_efficiency / cloud_ssd / cloud_essd
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    /// Size in GiB
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterDataDisk {
    pub category: String,

    /// Size in GiB
    pub size: i64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted: Option<bool>,
}

/// Network settings of an ACKCluster
///
/// `vpcId` and the vswitch lists are either all empty or all set.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSpec {
    /// Existing VPC to place the cluster in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vpc_id: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub master_vswitch_ids: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub worker_vswitch_ids: Vec<String>,

    /// Configure SNAT for the VPC
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snat_entry: Option<bool>,

    /// Pod CIDR, must not overlap the VPC CIDR
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_cidr: Option<String>,

    /// Service CIDR, must not overlap the VPC or pod CIDR
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_cidr: Option<String>,

    /// Expose the API server through a public endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint_public_access: Option<bool>,
}

impl NetworkSpec {
    /// All vswitch ids (control plane first, then workers), de-duplicated
    pub fn all_vswitch_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = Vec::new();
        for id in self.master_vswitch_ids.iter().chain(self.worker_vswitch_ids.iter()) {
            if !ids.contains(id) {
                ids.push(id.clone());
            }
        }
        ids
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Addon {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<String>,
}

/// ACKClusterStatus defines the observed state of ACKCluster
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ACKClusterStatus {
    /// Infrastructure is provisioned and the cluster may receive machines
    #[serde(default)]
    pub ready: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub master_instance_ids: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub node_instance_ids: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scaling_group_id: Option<String>,

    /// VPC the cluster was placed in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vpc_id: Option<String>,

    /// VSwitches the cluster was placed in
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub vswitch_ids: Vec<String>,

    /// Internal SLB fronting the API server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intranet_slb_id: Option<String>,
}

//! ECS / VPC API models
//!
//! Domain types handed to and returned from `EcsClientTrait`, plus the wire
//! shapes of the RPC responses the client decodes.
//! See: https://help.aliyun.com/document_detail/25506.html (DescribeInstances)

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Tag key identifying the machine resource an instance was created for.
/// The value is `<namespace>/<name>`.
pub const MACHINE_TAG_KEY: &str = "ack.infrastructure.cluster.x-k8s.io/machine";

/// A provider instance as seen by the controller
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    pub id: String,
    pub name: String,
    /// Provider lifecycle state, "Starting" already folded into "Pending"
    pub state: String,
    pub region_id: String,
    pub zone_id: String,
    pub instance_type: String,
    pub image_id: String,
    pub private_ip_addresses: Vec<String>,
    pub public_ip_addresses: Vec<String>,
    pub tags: BTreeMap<String, String>,
}

impl Instance {
    /// An instance RunInstances accepted but DescribeInstances does not show
    /// yet. Only what the request fixed is known; addresses arrive later.
    pub fn accepted(instance_id: impl Into<String>, request: &RunInstanceRequest, default_region: &str) -> Self {
        Self {
            id: instance_id.into(),
            name: request.instance_name.clone().unwrap_or_default(),
            state: "Pending".to_string(),
            region_id: if request.region_id.is_empty() {
                default_region.to_string()
            } else {
                request.region_id.clone()
            },
            zone_id: request.zone_id.clone().unwrap_or_default(),
            instance_type: request.instance_type.clone(),
            image_id: request.image_id.clone(),
            private_ip_addresses: Vec::new(),
            public_ip_addresses: Vec::new(),
            tags: request.tags.clone(),
        }
    }
}

/// How to identify an existing instance
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceLookup {
    pub region_id: String,
    /// Known instance id, takes precedence over the tag
    pub instance_id: Option<String>,
    /// Identifying tag (key, value)
    pub tag: Option<(String, String)>,
}

impl InstanceLookup {
    /// Lookup by the deterministic machine tag
    pub fn for_machine(region_id: impl Into<String>, namespace: &str, name: &str) -> Self {
        Self {
            region_id: region_id.into(),
            instance_id: None,
            tag: Some((MACHINE_TAG_KEY.to_string(), machine_tag_value(namespace, name))),
        }
    }

    pub fn with_instance_id(mut self, instance_id: Option<String>) -> Self {
        self.instance_id = instance_id;
        self
    }
}

/// Value of `MACHINE_TAG_KEY` for a machine resource
pub fn machine_tag_value(namespace: &str, name: &str) -> String {
    format!("{}/{}", namespace, name)
}

/// Parameters of a RunInstances call
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunInstanceRequest {
    pub region_id: String,
    pub zone_id: Option<String>,
    pub instance_type: String,
    pub image_id: String,
    pub instance_name: Option<String>,
    pub description: Option<String>,
    pub io_optimized: Option<String>,
    pub security_group_id: Option<String>,
    pub vswitch_id: Option<String>,
    pub private_ip_address: Option<String>,
    pub internet_max_bandwidth_in: Option<i64>,
    pub internet_max_bandwidth_out: Option<i64>,
    pub internet_charge_type: Option<String>,
    pub system_disk: SystemDiskRequest,
    pub data_disks: Vec<DataDiskRequest>,
    pub instance_charge_type: Option<String>,
    pub auto_renew: bool,
    pub auto_renew_period: Option<i64>,
    /// Raw bootstrap data, base64-encoded by the client
    pub user_data: Option<Vec<u8>>,
    pub tags: BTreeMap<String, String>,
    /// Idempotency token, the machine resource UID
    pub client_token: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SystemDiskRequest {
    pub size: Option<i64>,
    pub category: Option<String>,
    pub disk_name: Option<String>,
    pub description: Option<String>,
    pub performance_level: Option<String>,
    pub auto_snapshot_policy_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataDiskRequest {
    pub size: i64,
    pub snapshot_id: Option<String>,
    pub category: Option<String>,
    pub encrypted: Option<bool>,
    pub kms_key_id: Option<String>,
    pub disk_name: Option<String>,
    pub description: Option<String>,
    pub delete_with_instance: Option<bool>,
    pub performance_level: Option<String>,
    pub auto_snapshot_policy_id: Option<String>,
}

/// Network a cluster should be placed in
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkRequest {
    pub region_id: String,
    /// Existing VPC; `None` asks for one to be created
    pub vpc_id: Option<String>,
    pub vswitch_ids: Vec<String>,
}

/// Network a cluster was placed in
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkStatus {
    pub vpc_id: String,
    pub vswitch_ids: Vec<String>,
}

/// Load balancer fronting a cluster's API server
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadBalancerRequest {
    pub region_id: String,
    /// Already known load balancer, if any
    pub load_balancer_id: Option<String>,
}

// RPC wire shapes

/// Error body returned with a non-2xx status
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct RpcErrorBody {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct DescribeInstancesResponse {
    #[serde(default)]
    pub instances: InstanceSet,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct InstanceSet {
    #[serde(default)]
    pub instance: Vec<WireInstance>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct IpAddressSet {
    #[serde(default)]
    pub ip_address: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct VpcAttributes {
    #[serde(default)]
    pub private_ip_address: IpAddressSet,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct EipAddress {
    #[serde(default)]
    pub ip_address: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct WireTag {
    #[serde(rename = "TagKey", default)]
    pub key: String,
    #[serde(rename = "TagValue", default)]
    pub value: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct TagSet {
    #[serde(default)]
    pub tag: Vec<WireTag>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct WireInstance {
    pub instance_id: String,
    #[serde(default)]
    pub instance_name: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub region_id: String,
    #[serde(default)]
    pub zone_id: String,
    #[serde(default)]
    pub instance_type: String,
    #[serde(default)]
    pub image_id: String,
    #[serde(default)]
    pub vpc_attributes: VpcAttributes,
    #[serde(default)]
    pub inner_ip_address: IpAddressSet,
    #[serde(default)]
    pub public_ip_address: IpAddressSet,
    #[serde(default)]
    pub eip_address: EipAddress,
    #[serde(default)]
    pub tags: TagSet,
}

impl From<WireInstance> for Instance {
    fn from(wire: WireInstance) -> Self {
        let mut private_ip_addresses = wire.vpc_attributes.private_ip_address.ip_address;
        private_ip_addresses.extend(wire.inner_ip_address.ip_address);

        let mut public_ip_addresses = wire.public_ip_address.ip_address;
        if !wire.eip_address.ip_address.is_empty() {
            public_ip_addresses.push(wire.eip_address.ip_address);
        }

        Self {
            id: wire.instance_id,
            name: wire.instance_name,
            state: normalize_status(&wire.status),
            region_id: wire.region_id,
            zone_id: wire.zone_id,
            instance_type: wire.instance_type,
            image_id: wire.image_id,
            private_ip_addresses,
            public_ip_addresses,
            tags: wire.tags.tag.into_iter().map(|t| (t.key, t.value)).collect(),
        }
    }
}

/// Folds ECS-only states into the shared instance vocabulary
pub fn normalize_status(status: &str) -> String {
    match status {
        "Starting" => "Pending".to_string(),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct RunInstancesResponse {
    #[serde(default)]
    pub instance_id_sets: InstanceIdSet,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct InstanceIdSet {
    #[serde(default)]
    pub instance_id_set: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct DescribeVpcsResponse {
    #[serde(default)]
    pub vpcs: VpcSet,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct VpcSet {
    #[serde(default)]
    pub vpc: Vec<WireVpc>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub(crate) struct WireVpc {
    pub vpc_id: String,
    #[serde(rename = "VSwitchIds", default)]
    pub vswitch_ids: VSwitchIdSet,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct VSwitchIdSet {
    #[serde(rename = "VSwitchId", default)]
    pub vswitch_id: Vec<String>,
}

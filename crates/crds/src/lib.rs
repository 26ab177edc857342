//! ACK Provider CRD Definitions
//!
//! Kubernetes Custom Resource Definitions for the ACK infrastructure provider,
//! plus the typed Cluster API views the provider resolves its owners through.

pub mod ack_cluster;
pub mod ack_machine;
pub mod capi;
pub mod failure;
pub mod instance_state;

pub use ack_cluster::*;
pub use ack_machine::*;
pub use capi::*;
pub use failure::*;
pub use instance_state::*;

/// API group of the provider's infrastructure resources
pub const INFRASTRUCTURE_GROUP: &str = "infrastructure.cluster.x-k8s.io";

/// Finalizer guarding ACKCluster deletion until network/load-balancer teardown completes
pub const CLUSTER_FINALIZER: &str = "ackcluster.infrastructure.cluster.x-k8s.io";

/// Finalizer guarding ACKMachine deletion until the ECS instance is released
pub const MACHINE_FINALIZER: &str = "ackmachine.infrastructure.cluster.x-k8s.io";

/// Scheme prefix of provider IDs written to `ACKMachine.spec.providerID`
pub const PROVIDER_ID_PREFIX: &str = "ack:////";

/// Builds the provider ID for an ECS instance id.
pub fn provider_id(instance_id: &str) -> String {
    format!("{}{}", PROVIDER_ID_PREFIX, instance_id)
}

/// Common Alibaba Cloud resource tag
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Tag {
    /// Tag key
    pub key: String,

    /// Tag value
    #[serde(default)]
    pub value: String,
}

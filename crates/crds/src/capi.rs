//! Cluster API objects
//!
//! Read-only typed views of the `cluster.x-k8s.io` Cluster and Machine
//! resources. Only the fields the provider consults are modelled; the CRDs
//! themselves are installed by Cluster API, never by `crdgen`.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// API group of Cluster API core resources
pub const CAPI_GROUP: &str = "cluster.x-k8s.io";

/// Label carrying the owning Cluster's name on Machines
pub const CLUSTER_NAME_LABEL: &str = "cluster.x-k8s.io/cluster-name";

/// Annotation pausing reconciliation of an object
pub const PAUSED_ANNOTATION: &str = "cluster.x-k8s.io/paused";

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "cluster.x-k8s.io",
    version = "v1beta1",
    kind = "Cluster",
    namespaced,
    status = "ClusterStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// Stops reconciliation of the cluster and everything it owns
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused: Option<bool>,

    /// Infrastructure object (ACKCluster) backing this cluster
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infrastructure_ref: Option<ObjectReference>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    #[serde(default)]
    pub infrastructure_ready: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,
}

impl Cluster {
    pub fn is_paused(&self) -> bool {
        self.spec.paused.unwrap_or(false) || has_paused_annotation(&self.metadata)
    }

    pub fn infrastructure_ready(&self) -> bool {
        self.status.as_ref().map(|s| s.infrastructure_ready).unwrap_or(false)
    }
}

#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "cluster.x-k8s.io",
    version = "v1beta1",
    kind = "Machine",
    namespaced,
    status = "MachineStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct MachineSpec {
    pub cluster_name: String,

    #[serde(default)]
    pub bootstrap: Bootstrap,

    /// Infrastructure object (ACKMachine) backing this machine
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub infrastructure_ref: Option<ObjectReference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default, rename = "providerID", skip_serializing_if = "Option::is_none")]
    pub provider_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Bootstrap {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_ref: Option<ObjectReference>,

    /// Secret holding the bootstrap data under the `value` key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_secret_name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MachineStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<String>,

    #[serde(default)]
    pub bootstrap_ready: bool,

    #[serde(default)]
    pub infrastructure_ready: bool,
}

impl Machine {
    /// Name of the owning Cluster: the cluster-name label, else spec.clusterName
    pub fn cluster_name(&self) -> Option<&str> {
        self.metadata
            .labels
            .as_ref()
            .and_then(|l| l.get(CLUSTER_NAME_LABEL))
            .map(String::as_str)
            .or_else(|| {
                let name = self.spec.cluster_name.as_str();
                if name.is_empty() { None } else { Some(name) }
            })
    }

    pub fn bootstrap_data_secret_name(&self) -> Option<&str> {
        self.spec.bootstrap.data_secret_name.as_deref()
    }
}

/// Reference to another object, as used by Cluster API
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ObjectReference {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,

    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// True when the paused annotation is present, whatever its value
pub fn has_paused_annotation(meta: &ObjectMeta) -> bool {
    meta.annotations
        .as_ref()
        .map(|a| a.contains_key(PAUSED_ANNOTATION))
        .unwrap_or(false)
}

/// Name of the Cluster API owner of the given kind, if an owner reference exists.
pub fn capi_owner_name(meta: &ObjectMeta, kind: &str) -> Option<String> {
    meta.owner_references.as_ref()?.iter().find_map(|owner| {
        let group = owner.api_version.split('/').next().unwrap_or_default();
        if owner.kind == kind && group == CAPI_GROUP {
            Some(owner.name.clone())
        } else {
            None
        }
    })
}

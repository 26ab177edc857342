//! Resource store seam
//!
//! Everything the reconcilers read from or write to the Kubernetes API goes
//! through `ResourceStore`. `KubeStore` is the API-server implementation;
//! tests use the in-memory store from `test_utils`.

use crate::error::ControllerError;
use crds::{ACKCluster, ACKMachine, Cluster, Machine};
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt::Debug;
use tracing::debug;

/// Key of the bootstrap Secret holding the user data
pub const BOOTSTRAP_DATA_KEY: &str = "value";

/// Infrastructure kinds this controller writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InfraKind {
    Cluster,
    Machine,
}

impl InfraKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Cluster => "ACKCluster",
            Self::Machine => "ACKMachine",
        }
    }
}

/// One optimistic patch transaction
///
/// `main` carries metadata and spec changes, `status` the status changes.
/// Both are JSON merge patches and are applied in that order, each guarded by
/// the resource version the previous step observed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectPatch {
    pub resource_version: Option<String>,
    pub main: Option<Value>,
    pub status: Option<Value>,
}

impl ObjectPatch {
    pub fn is_empty(&self) -> bool {
        self.main.is_none() && self.status.is_none()
    }
}

/// Result of committing an `ObjectPatch`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchOutcome {
    /// Written; carries the new resource version
    Applied { resource_version: Option<String> },
    /// Nothing to write
    Unchanged,
    /// The object no longer exists
    Gone,
}

/// Reads and writes of the objects a reconciliation touches
#[async_trait::async_trait]
pub trait ResourceStore: Send + Sync {
    async fn get_ack_cluster(&self, namespace: &str, name: &str) -> Result<Option<ACKCluster>, ControllerError>;

    async fn get_ack_machine(&self, namespace: &str, name: &str) -> Result<Option<ACKMachine>, ControllerError>;

    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Option<Cluster>, ControllerError>;

    async fn get_machine(&self, namespace: &str, name: &str) -> Result<Option<Machine>, ControllerError>;

    /// Bootstrap user data from the `value` key of a Secret, byte for byte
    async fn get_bootstrap_data(&self, namespace: &str, secret_name: &str) -> Result<Option<Vec<u8>>, ControllerError>;

    /// Commit a patch. A vanished object is `Gone`, a stale resource
    /// version is `ControllerError::Conflict`.
    async fn patch(
        &self,
        kind: InfraKind,
        namespace: &str,
        name: &str,
        patch: &ObjectPatch,
    ) -> Result<PatchOutcome, ControllerError>;
}

/// `ResourceStore` backed by the Kubernetes API server
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

/// Adds the optimistic-lock precondition to a merge patch body
fn with_resource_version(body: &Value, resource_version: Option<&str>) -> Value {
    let mut body = body.clone();
    if let (Some(rv), Some(obj)) = (resource_version, body.as_object_mut()) {
        let metadata = obj
            .entry("metadata")
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
        if let Some(metadata) = metadata.as_object_mut() {
            metadata.insert("resourceVersion".to_string(), Value::String(rv.to_string()));
        }
    }
    body
}

/// User data held by a bootstrap Secret. Often gzip'd, so never decoded as text.
fn bootstrap_data(secret: Secret) -> Option<Vec<u8>> {
    secret.data?.remove(BOOTSTRAP_DATA_KEY).map(|bytes| bytes.0)
}

enum StepError {
    Gone,
    Failed(ControllerError),
}

fn classify(error: kube::Error, what: &str) -> StepError {
    match error {
        kube::Error::Api(ae) if ae.code == 404 => StepError::Gone,
        kube::Error::Api(ae) if ae.code == 409 => StepError::Failed(ControllerError::Conflict(what.to_string())),
        other => StepError::Failed(ControllerError::Kube(other)),
    }
}

async fn apply_patch<K>(api: Api<K>, name: &str, patch: &ObjectPatch, what: &str) -> Result<PatchOutcome, ControllerError>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    if patch.is_empty() {
        return Ok(PatchOutcome::Unchanged);
    }

    let params = PatchParams::default();
    let mut resource_version = patch.resource_version.clone();

    if let Some(main) = &patch.main {
        let body = with_resource_version(main, resource_version.as_deref());
        match api.patch(name, &params, &Patch::Merge(&body)).await {
            Ok(obj) => resource_version = obj.meta().resource_version.clone(),
            Err(e) => {
                return match classify(e, what) {
                    StepError::Gone => Ok(PatchOutcome::Gone),
                    StepError::Failed(e) => Err(e),
                };
            }
        }
    }

    if let Some(status) = &patch.status {
        let body = with_resource_version(status, resource_version.as_deref());
        match api.patch_status(name, &params, &Patch::Merge(&body)).await {
            Ok(obj) => resource_version = obj.meta().resource_version.clone(),
            Err(e) => {
                return match classify(e, what) {
                    StepError::Gone => Ok(PatchOutcome::Gone),
                    StepError::Failed(e) => Err(e),
                };
            }
        }
    }

    debug!("Patched {} (resourceVersion {:?})", what, resource_version);
    Ok(PatchOutcome::Applied { resource_version })
}

#[async_trait::async_trait]
impl ResourceStore for KubeStore {
    async fn get_ack_cluster(&self, namespace: &str, name: &str) -> Result<Option<ACKCluster>, ControllerError> {
        let api: Api<ACKCluster> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn get_ack_machine(&self, namespace: &str, name: &str) -> Result<Option<ACKMachine>, ControllerError> {
        let api: Api<ACKMachine> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Option<Cluster>, ControllerError> {
        let api: Api<Cluster> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn get_machine(&self, namespace: &str, name: &str) -> Result<Option<Machine>, ControllerError> {
        let api: Api<Machine> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn get_bootstrap_data(&self, namespace: &str, secret_name: &str) -> Result<Option<Vec<u8>>, ControllerError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(secret_name).await?.and_then(bootstrap_data))
    }

    async fn patch(
        &self,
        kind: InfraKind,
        namespace: &str,
        name: &str,
        patch: &ObjectPatch,
    ) -> Result<PatchOutcome, ControllerError> {
        let what = format!("{} {}/{}", kind.as_str(), namespace, name);
        match kind {
            InfraKind::Cluster => {
                let api: Api<ACKCluster> = Api::namespaced(self.client.clone(), namespace);
                apply_patch(api, name, patch, &what).await
            }
            InfraKind::Machine => {
                let api: Api<ACKMachine> = Api::namespaced(self.client.clone(), namespace);
                apply_patch(api, name, patch, &what).await
            }
        }
    }
}

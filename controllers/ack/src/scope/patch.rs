//! Snapshot-and-diff patch helper
//!
//! Captures an object when a scope opens, then turns whatever the reconciler
//! changed in memory into one `ObjectPatch` against that snapshot.

use crate::error::ControllerError;
use crate::store::{InfraKind, ObjectPatch, PatchOutcome, ResourceStore};
use crds::{ACKCluster, ACKMachine};
use kube::{Resource, ResourceExt};
use serde::Serialize;
use serde_json::{Map, Value};
use std::marker::PhantomData;
use tracing::{debug, error};

/// Metadata fields a reconciler may change
const PATCHED_METADATA: [&str; 4] = ["labels", "annotations", "finalizers", "ownerReferences"];

/// Infrastructure objects a scope can patch
pub trait PatchTarget: Resource<DynamicType = ()> + Serialize + Clone + Send + Sync {
    const KIND: InfraKind;
}

impl PatchTarget for ACKCluster {
    const KIND: InfraKind = InfraKind::Cluster;
}

impl PatchTarget for ACKMachine {
    const KIND: InfraKind = InfraKind::Machine;
}

/// JSON merge patch turning `before` into `after`, `None` when equal.
///
/// Objects are diffed key by key, removed keys become `null`, anything else
/// (arrays included) is replaced whole.
pub fn merge_diff(before: &Value, after: &Value) -> Option<Value> {
    if before == after {
        return None;
    }
    match (before, after) {
        (Value::Object(b), Value::Object(a)) => {
            let mut patch = Map::new();
            for (key, new) in a {
                let old = b.get(key).unwrap_or(&Value::Null);
                if let Some(change) = merge_diff(old, new) {
                    patch.insert(key.clone(), change);
                }
            }
            for key in b.keys() {
                if !a.contains_key(key) {
                    patch.insert(key.clone(), Value::Null);
                }
            }
            if patch.is_empty() { None } else { Some(Value::Object(patch)) }
        }
        _ => Some(after.clone()),
    }
}

fn field<'a>(value: &'a Value, key: &str) -> &'a Value {
    value.get(key).unwrap_or(&Value::Null)
}

fn patched_metadata(object: &Value) -> Value {
    let metadata = field(object, "metadata");
    let kept: Map<String, Value> = PATCHED_METADATA
        .iter()
        .filter_map(|key| metadata.get(*key).map(|v| (key.to_string(), v.clone())))
        .collect();
    Value::Object(kept)
}

/// Tracks one object between its snapshot and the commit
#[derive(Debug)]
pub struct PatchHelper<K> {
    namespace: String,
    name: String,
    before: Value,
    resource_version: Option<String>,
    _kind: PhantomData<K>,
}

impl<K: PatchTarget> PatchHelper<K> {
    /// Snapshot `object` as the base of the next patch
    pub fn new(object: &K) -> Result<Self, ControllerError> {
        let namespace = object.namespace().ok_or_else(|| {
            ControllerError::InvalidParameters(format!("{} {} has no namespace", K::KIND.as_str(), object.name_any()))
        })?;
        Ok(Self {
            namespace,
            name: object.name_any(),
            before: serde_json::to_value(object)?,
            resource_version: object.resource_version(),
            _kind: PhantomData,
        })
    }

    /// Computes the patch from the snapshot to `object`
    pub fn diff(&self, object: &K) -> Result<ObjectPatch, ControllerError> {
        let after = serde_json::to_value(object)?;

        let mut main = Map::new();
        if let Some(metadata) = merge_diff(&patched_metadata(&self.before), &patched_metadata(&after)) {
            main.insert("metadata".to_string(), metadata);
        }
        if let Some(spec) = merge_diff(field(&self.before, "spec"), field(&after, "spec")) {
            main.insert("spec".to_string(), spec);
        }

        let status = merge_diff(field(&self.before, "status"), field(&after, "status"))
            .filter(|s| !s.is_null())
            .map(|s| Value::Object(Map::from_iter([("status".to_string(), s)])));

        Ok(ObjectPatch {
            resource_version: self.resource_version.clone(),
            main: if main.is_empty() { None } else { Some(Value::Object(main)) },
            status,
        })
    }

    /// Commits the changes made to `object` since the last snapshot, then
    /// re-snapshots it so a later commit only carries newer changes.
    pub async fn patch(&mut self, store: &dyn ResourceStore, object: &mut K) -> Result<PatchOutcome, ControllerError> {
        let patch = self.diff(object)?;
        if patch.is_empty() {
            debug!("No changes to {} {}/{}", K::KIND.as_str(), self.namespace, self.name);
            return Ok(PatchOutcome::Unchanged);
        }

        let outcome = store.patch(K::KIND, &self.namespace, &self.name, &patch).await?;
        match &outcome {
            PatchOutcome::Applied { resource_version } => {
                object.meta_mut().resource_version = resource_version.clone();
                self.resource_version = resource_version.clone();
                self.before = serde_json::to_value(&*object)?;
            }
            PatchOutcome::Gone => {
                debug!("{} {}/{} is gone, skipping patch", K::KIND.as_str(), self.namespace, self.name);
            }
            PatchOutcome::Unchanged => {}
        }
        Ok(outcome)
    }
}

/// Combines the outcome of a reconciliation with the outcome of its cleanup.
///
/// The first error wins. A cleanup error that loses is logged, never returned.
pub fn first_error<T>(result: Result<T, ControllerError>, cleanup: Result<(), ControllerError>) -> Result<T, ControllerError> {
    match (result, cleanup) {
        (Err(e), Err(cleanup_error)) => {
            error!("Cleanup failed after an earlier error ({}): {}", e, cleanup_error);
            Err(e)
        }
        (Err(e), Ok(())) => Err(e),
        (Ok(_), Err(cleanup_error)) => Err(cleanup_error),
        (Ok(value), Ok(())) => Ok(value),
    }
}

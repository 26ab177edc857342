//! Per-reconciliation scopes
//!
//! A scope owns the objects one reconciliation pass works on. Mutations go to
//! the in-memory copy of the infrastructure object; `close()` commits them in a
//! single optimistic patch. Reconcilers close the scope on every exit path and
//! combine the outcome with `first_error`.

pub mod cluster;
pub mod machine;
pub mod patch;

pub use cluster::{ClusterScope, ClusterScopeParams};
pub use machine::{MachineScope, MachineScopeParams};
pub use patch::first_error;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

/// True if `finalizer` is registered on the object
pub fn has_finalizer(meta: &ObjectMeta, finalizer: &str) -> bool {
    meta.finalizers
        .as_ref()
        .map(|f| f.iter().any(|x| x == finalizer))
        .unwrap_or(false)
}

/// Registers `finalizer`; returns false if it was already present
pub fn add_finalizer(meta: &mut ObjectMeta, finalizer: &str) -> bool {
    if has_finalizer(meta, finalizer) {
        return false;
    }
    meta.finalizers.get_or_insert_with(Vec::new).push(finalizer.to_string());
    true
}

/// Removes `finalizer`; returns false if it was not present
pub fn remove_finalizer(meta: &mut ObjectMeta, finalizer: &str) -> bool {
    let Some(finalizers) = meta.finalizers.as_mut() else {
        return false;
    };
    let before = finalizers.len();
    finalizers.retain(|f| f != finalizer);
    finalizers.len() != before
}

fn required<T>(value: Option<T>, what: &str) -> Result<T, crate::error::ControllerError> {
    value.ok_or_else(|| crate::error::ControllerError::InvalidParameters(format!("{} is required when creating a scope", what)))
}

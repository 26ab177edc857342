//! Kubernetes resource watchers.
//!
//! One `kube_runtime::Controller` per infrastructure kind. Besides the kind
//! itself, each controller watches the Cluster API objects whose changes
//! unblock it: Cluster -> ACKCluster through `spec.infrastructureRef`,
//! Machine -> ACKMachine through `spec.infrastructureRef`, and
//! Cluster -> every ACKMachine labelled with that cluster's name.

use crate::error::ControllerError;
use crate::reconciler::{ReconcileOutcome, Reconciler};
use crds::{ACKCluster, ACKMachine, CLUSTER_NAME_LABEL, Cluster, Machine, ObjectReference};
use futures::StreamExt;
use kube::{Api, Client, Resource, ResourceExt};
use kube_runtime::reflector::ObjectRef;
use kube_runtime::{Controller, controller::{Action, Config as ControllerConfig}, watcher};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

type ReconcileFuture = Pin<Box<dyn Future<Output = Result<ReconcileOutcome, ControllerError>> + Send>>;

fn to_action(outcome: ReconcileOutcome) -> Action {
    match outcome {
        ReconcileOutcome::Done => Action::await_change(),
        ReconcileOutcome::RequeueAfter(delay) => Action::requeue(delay),
    }
}

fn backoff_key<K: ResourceExt>(kind: &str, obj: &K) -> String {
    format!("{}/{}/{}", kind, obj.namespace().unwrap_or_default(), obj.name_any())
}

/// Drives `controller` until its watch streams end.
///
/// Successful passes reset the per-resource backoff; failures are requeued
/// after the next Fibonacci delay for that resource.
async fn run_controller<K, F>(
    controller: Controller<K>,
    reconciler: Arc<Reconciler>,
    reconcile_fn: F,
    kind: &'static str,
    concurrency: u16,
) -> Result<(), ControllerError>
where
    K: Resource<DynamicType = ()> + Clone + Debug + DeserializeOwned + Send + Sync + 'static,
    F: Fn(Arc<Reconciler>, String, String) -> ReconcileFuture + Send + Sync + Clone + 'static,
{
    info!("Starting {} watcher", kind);

    let error_policy = move |obj: Arc<K>, error: &ControllerError, ctx: Arc<Reconciler>| {
        let key = backoff_key(kind, obj.as_ref());
        ctx.metrics().record_reconcile(kind, error.kind());
        let delay = ctx.error_backoff(&key);
        error!("Reconciliation of {} failed, retrying in {}s: {}", key, delay.as_secs(), error);
        Action::requeue(delay)
    };

    let reconcile = move |obj: Arc<K>, ctx: Arc<Reconciler>| {
        let reconcile_fn = reconcile_fn.clone();
        async move {
            let namespace = obj.namespace().unwrap_or_default();
            let name = obj.name_any();
            debug!("Reconciling {} {}/{}", kind, namespace, name);

            let outcome = reconcile_fn(Arc::clone(&ctx), namespace, name).await?;
            ctx.metrics().record_reconcile(kind, "success");
            ctx.reset_backoff(&backoff_key(kind, obj.as_ref()));
            Ok(to_action(outcome))
        }
    };

    let config = ControllerConfig::default()
        .debounce(Duration::from_secs(1))
        .concurrency(concurrency);

    controller
        .with_config(config)
        .run(reconcile, error_policy, reconciler)
        .for_each(|res| async move {
            match res {
                Ok((obj, _)) => debug!("Reconciled {} {}", kind, obj.name),
                Err(e) => error!("Controller error for {}: {}", kind, e),
            }
        })
        .await;

    Err(ControllerError::Watch(format!("{} watch stream ended", kind)))
}

/// Infrastructure object named by an infrastructure reference of the given kind
fn referenced<K>(reference: Option<&ObjectReference>, expected_kind: &str, owner_namespace: Option<String>) -> Option<ObjectRef<K>>
where
    K: Resource<DynamicType = ()>,
{
    let reference = reference?;
    if reference.kind.as_deref() != Some(expected_kind) {
        return None;
    }
    let namespace = reference.namespace.clone().or(owner_namespace)?;
    Some(ObjectRef::new(&reference.name).within(&namespace))
}

/// Watches ACKCluster and ACKMachine resources.
pub struct Watcher {
    reconciler: Arc<Reconciler>,
    client: Client,
    namespace: Option<String>,
    concurrency: u16,
}

impl Watcher {
    pub fn new(reconciler: Arc<Reconciler>, client: Client, namespace: Option<String>, concurrency: u16) -> Self {
        Self { reconciler, client, namespace, concurrency }
    }

    fn api<K>(&self) -> Api<K>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope, DynamicType = ()>,
    {
        match &self.namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        }
    }

    /// Starts watching ACKCluster resources.
    pub async fn watch_ack_clusters(&self) -> Result<(), ControllerError> {
        let controller = Controller::new(self.api::<ACKCluster>(), watcher::Config::default()).watches(
            self.api::<Cluster>(),
            watcher::Config::default(),
            |cluster: Cluster| {
                referenced::<ACKCluster>(cluster.spec.infrastructure_ref.as_ref(), "ACKCluster", cluster.namespace())
            },
        );

        run_controller(
            controller,
            self.reconciler.clone(),
            |reconciler, namespace, name| {
                Box::pin(async move { reconciler.reconcile_ack_cluster(&namespace, &name).await })
            },
            "ACKCluster",
            self.concurrency,
        )
        .await
    }

    /// Starts watching ACKMachine resources.
    pub async fn watch_ack_machines(&self) -> Result<(), ControllerError> {
        let controller = Controller::new(self.api::<ACKMachine>(), watcher::Config::default());
        let ack_machines = controller.store();

        let controller = controller
            .watches(self.api::<Machine>(), watcher::Config::default(), |machine: Machine| {
                referenced::<ACKMachine>(machine.spec.infrastructure_ref.as_ref(), "ACKMachine", machine.namespace())
            })
            .watches(self.api::<Cluster>(), watcher::Config::default(), move |cluster: Cluster| {
                let name = cluster.name_any();
                let namespace = cluster.namespace();
                ack_machines
                    .state()
                    .into_iter()
                    .filter(|m| m.namespace() == namespace && m.labels().get(CLUSTER_NAME_LABEL) == Some(&name))
                    .map(|m| ObjectRef::from_obj(m.as_ref()))
                    .collect::<Vec<_>>()
            });

        run_controller(
            controller,
            self.reconciler.clone(),
            |reconciler, namespace, name| {
                Box::pin(async move { reconciler.reconcile_ack_machine(&namespace, &name).await })
            },
            "ACKMachine",
            self.concurrency,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_referenced_matches_kind_and_defaults_namespace() {
        let reference = ObjectReference {
            api_version: Some("infrastructure.cluster.x-k8s.io/v1alpha3".to_string()),
            kind: Some("ACKMachine".to_string()),
            name: "m-0".to_string(),
            namespace: None,
        };
        let found = referenced::<ACKMachine>(Some(&reference), "ACKMachine", Some("default".to_string())).unwrap();
        assert_eq!(found.name, "m-0");
        assert_eq!(found.namespace.as_deref(), Some("default"));

        assert!(referenced::<ACKCluster>(Some(&reference), "ACKCluster", Some("default".to_string())).is_none());
        assert!(referenced::<ACKMachine>(None, "ACKMachine", Some("default".to_string())).is_none());
    }

    #[test]
    fn test_outcome_to_action() {
        assert_eq!(to_action(ReconcileOutcome::Done), Action::await_change());
        assert_eq!(
            to_action(ReconcileOutcome::RequeueAfter(Duration::from_secs(30))),
            Action::requeue(Duration::from_secs(30))
        );
    }
}

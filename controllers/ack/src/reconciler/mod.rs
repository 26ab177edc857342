//! Reconciliation logic for ACKCluster and ACKMachine.
//!
//! - `cluster`: network and load balancer of an ACKCluster, cluster finalizer
//! - `machine`: the ECS instance behind an ACKMachine, machine finalizer
//! - `instance_state`: provider state to readiness/failure mapping

pub mod cluster;
pub mod instance_state;
pub mod machine;

#[cfg(test)]
mod machine_test;

use crate::backoff::FibonacciBackoff;
use crate::error::ControllerError;
use crate::events::EventPublisher;
use crate::metrics::Metrics;
use crate::store::ResourceStore;
use ecs_client::{EcsClientTrait, EcsError};
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::EventType;
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::error;

/// Delay before looking at an instance that is not running yet
pub const NOT_READY_REQUEUE: Duration = Duration::from_secs(30);

const BACKOFF_MIN_SECONDS: u64 = 5;
const BACKOFF_MAX_SECONDS: u64 = 300;

/// How a successful reconciliation wants to be scheduled next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Wait for the next change event
    Done,
    /// Look again after the given delay
    RequeueAfter(Duration),
}

/// Reconciles ACK infrastructure resources.
pub struct Reconciler {
    pub(crate) store: Arc<dyn ResourceStore>,
    pub(crate) ecs: Arc<dyn EcsClientTrait>,
    pub(crate) events: Arc<dyn EventPublisher>,
    pub(crate) metrics: Metrics,
    cloud_call_timeout: Duration,
    default_region: String,
    /// Error backoff per resource (kind/namespace/name)
    backoff_states: Arc<Mutex<HashMap<String, FibonacciBackoff>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        ecs: Arc<dyn EcsClientTrait>,
        events: Arc<dyn EventPublisher>,
        metrics: Metrics,
        cloud_call_timeout: Duration,
        default_region: impl Into<String>,
    ) -> Self {
        Self {
            store,
            ecs,
            events,
            metrics,
            cloud_call_timeout,
            default_region: default_region.into(),
            backoff_states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub(crate) fn default_region(&self) -> String {
        self.default_region.clone()
    }

    /// Runs one provider call under the configured deadline. An expired
    /// deadline is a retryable `Timeout`; the call itself is dropped.
    pub(crate) async fn cloud_call<T, F>(&self, what: &str, call: F) -> Result<T, ControllerError>
    where
        F: Future<Output = Result<T, EcsError>>,
    {
        match tokio::time::timeout(self.cloud_call_timeout, call).await {
            Ok(result) => result.map_err(|e| {
                error!("{} failed: {}", what, e);
                ControllerError::Ecs(e)
            }),
            Err(_) => Err(ControllerError::Timeout(format!(
                "{} did not finish within {}s",
                what,
                self.cloud_call_timeout.as_secs()
            ))),
        }
    }

    pub(crate) async fn publish(
        &self,
        object_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: impl Into<String>,
    ) {
        self.events.publish(object_ref, type_, reason, action, Some(note.into())).await;
    }

    /// Next error requeue delay for `key`
    pub fn error_backoff(&self, key: &str) -> Duration {
        let mut states = lock(&self.backoff_states);
        states
            .entry(key.to_string())
            .or_insert_with(|| FibonacciBackoff::new(BACKOFF_MIN_SECONDS, BACKOFF_MAX_SECONDS))
            .next_backoff()
    }

    /// Forget the error history of `key` after a successful pass
    pub fn reset_backoff(&self, key: &str) {
        lock(&self.backoff_states).remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::create_test_reconciler;

    #[test]
    fn test_error_backoff_grows_per_resource_and_resets() {
        let (reconciler, _, _, _) = create_test_reconciler();
        assert_eq!(reconciler.error_backoff("ACKMachine/default/m-0"), Duration::from_secs(5));
        assert_eq!(reconciler.error_backoff("ACKMachine/default/m-0"), Duration::from_secs(5));
        assert_eq!(reconciler.error_backoff("ACKMachine/default/m-0"), Duration::from_secs(10));
        assert_eq!(reconciler.error_backoff("ACKMachine/default/m-1"), Duration::from_secs(5));

        reconciler.reset_backoff("ACKMachine/default/m-0");
        assert_eq!(reconciler.error_backoff("ACKMachine/default/m-0"), Duration::from_secs(5));
    }

    #[test]
    fn test_successful_pass_drops_backoff_entry() {
        let (reconciler, _, _, _) = create_test_reconciler();
        reconciler.error_backoff("ACKMachine/default/m-0");
        reconciler.error_backoff("ACKMachine/default/m-1");

        reconciler.reset_backoff("ACKMachine/default/m-0");
        reconciler.reset_backoff("ACKMachine/default/never-failed");

        let states = lock(&reconciler.backoff_states);
        assert_eq!(states.len(), 1);
        assert!(states.contains_key("ACKMachine/default/m-1"));
    }

    #[tokio::test]
    async fn test_cloud_call_times_out() {
        let (mut reconciler, _, _, _) = create_test_reconciler();
        reconciler.cloud_call_timeout = Duration::from_millis(10);
        let slow = async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, EcsError>(())
        };
        let result = reconciler.cloud_call("find_instance", slow).await;
        assert!(matches!(result, Err(ControllerError::Timeout(_))));
    }
}

//! Kubernetes Events for ACKCluster and ACKMachine
//!
//! Publication is fire-and-forget: a failed publish is logged and never
//! reaches the reconciler.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use tracing::warn;

/// Reporting component shown on published events
pub const CONTROLLER_NAME: &str = "ack-controller";

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Publisher backed by `kube::runtime::events::Recorder`
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    pub fn new(client: Client) -> Self {
        let reporter = Reporter {
            controller: CONTROLLER_NAME.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self { recorder: Recorder::new(client, reporter) }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(reason, action, error = %e, "Failed to publish event");
        }
    }
}

/// Event reasons (REASON column of `kubectl get events`)
pub mod reasons {
    pub const INSTANCE_STATE_CHANGED: &str = "InstanceStateChanged";
    pub const INSTANCE_CREATED: &str = "InstanceCreated";
    pub const INSTANCE_TERMINATED: &str = "InstanceTerminated";
    pub const INFRASTRUCTURE_READY: &str = "InfrastructureReady";

    // Warnings
    pub const INSTANCE_UNEXPECTED_TERMINATION: &str = "InstanceUnexpectedTermination";
    pub const INSTANCE_UNHANDLED_STATE: &str = "InstanceUnhandledState";
    pub const INSTANCE_NOT_FOUND: &str = "InstanceNotFound";
    pub const PROVIDER_ID_MISMATCH: &str = "ProviderIDMismatch";
}

/// Event actions (ACTION column)
pub mod actions {
    pub const RECONCILE: &str = "Reconcile";
    pub const CREATE: &str = "Create";
    pub const DELETE: &str = "Delete";
}

//! Controller-specific error types.
//!
//! Retryable conditions (conflicts, timeouts, provider errors) surface as
//! errors and are requeued with backoff. Terminal machine problems are never
//! errors: they are written to the machine status instead.

use ecs_client::EcsError;
use kube::Error as KubeError;
use thiserror::Error;

/// Errors that can occur in the ACK Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Cloud provider error
    #[error("ECS error: {0}")]
    Ecs(#[from] EcsError),

    /// A scope was built without one of its required objects
    #[error("Invalid scope parameters: {0}")]
    InvalidParameters(String),

    /// Optimistic concurrency check failed while patching
    #[error("Conflict while patching {0}")]
    Conflict(String),

    /// A cloud call exceeded its deadline
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// JSON serialization error while building patches
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Probe server I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ControllerError {
    /// Short label used as the `result` of the reconcile counter
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Kube(_) => "kube_error",
            Self::Ecs(_) => "ecs_error",
            Self::InvalidParameters(_) => "invalid_parameters",
            Self::Conflict(_) => "conflict",
            Self::Timeout(_) => "timeout",
            Self::InvalidConfig(_) => "invalid_config",
            Self::Serialization(_) => "serialization_error",
            Self::Watch(_) => "watch_error",
            Self::Metrics(_) => "metrics_error",
            Self::Io(_) => "io_error",
        }
    }
}

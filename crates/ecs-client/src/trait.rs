//! EcsClient trait for mocking
//!
//! The reconcilers only see this trait. `EcsClient` talks to Alibaba Cloud,
//! `MockEcsClient` (feature `test-util`) keeps everything in memory.

use crate::error::EcsError;
use crate::models::*;

/// Cloud provider operations used by the ACK reconcilers
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait EcsClientTrait: Send + Sync {
    /// Default region of the client
    fn region_id(&self) -> &str;

    /// Checks credentials and connectivity with a cheap signed call
    async fn validate_credentials(&self) -> Result<(), EcsError>;

    /// Creates one instance. Safe to retry: repeated calls with the same
    /// client token produce the same instance. An instance that exists but
    /// is not describable yet comes back as `Pending`. `None` means the
    /// provider returned no instance id at all.
    async fn run_instance(&self, request: &RunInstanceRequest) -> Result<Option<Instance>, EcsError>;

    /// Finds an existing instance, terminated ones included
    async fn find_instance(&self, lookup: &InstanceLookup) -> Result<Option<Instance>, EcsError>;

    /// Releases an instance; an unknown id is success
    async fn terminate_instance(&self, region_id: &str, instance_id: &str) -> Result<(), EcsError>;

    async fn reconcile_network(&self, request: &NetworkRequest) -> Result<NetworkStatus, EcsError>;

    async fn delete_network(&self, request: &NetworkRequest) -> Result<(), EcsError>;

    /// Returns the id of the load balancer fronting the API server, if any
    async fn reconcile_load_balancer(&self, request: &LoadBalancerRequest) -> Result<Option<String>, EcsError>;

    async fn delete_load_balancer(&self, request: &LoadBalancerRequest) -> Result<(), EcsError>;
}

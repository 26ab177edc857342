//! Mock EcsClient for unit testing
//!
//! Keeps instances in memory, counts every call and lets tests inject faults,
//! so reconcilers can be driven without an Alibaba Cloud account.

use crate::ecs_trait::EcsClientTrait;
use crate::error::EcsError;
use crate::models::*;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Number of calls made per operation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub run_instance: usize,
    pub find_instance: usize,
    pub terminate_instance: usize,
    pub reconcile_network: usize,
    pub delete_network: usize,
    pub reconcile_load_balancer: usize,
    pub delete_load_balancer: usize,
}

impl CallCounts {
    /// Calls that change provider state
    pub fn mutating(&self) -> usize {
        self.run_instance + self.terminate_instance + self.reconcile_network + self.delete_network
            + self.reconcile_load_balancer + self.delete_load_balancer
    }
}

#[derive(Debug, Clone)]
struct Faults {
    run_instance_error: Option<String>,
    run_instance_returns_none: bool,
    hide_new_instances: bool,
    find_instance_error: Option<String>,
    terminate_error: Option<String>,
    network_error: Option<String>,
    new_instance_state: String,
}

impl Default for Faults {
    fn default() -> Self {
        Self {
            run_instance_error: None,
            run_instance_returns_none: false,
            hide_new_instances: false,
            find_instance_error: None,
            terminate_error: None,
            network_error: None,
            new_instance_state: "Pending".to_string(),
        }
    }
}

/// Mock EcsClient for testing
#[derive(Debug, Clone)]
pub struct MockEcsClient {
    region_id: String,
    instances: Arc<Mutex<BTreeMap<String, Instance>>>,
    client_tokens: Arc<Mutex<HashMap<String, String>>>,
    /// User data each instance was launched with
    user_data: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    /// Created but not yet visible to the next lookup
    hidden: Arc<Mutex<HashSet<String>>>,
    calls: Arc<Mutex<CallCounts>>,
    faults: Arc<Mutex<Faults>>,
    next_id: Arc<Mutex<u64>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn fault(message: &str) -> EcsError {
    EcsError::Api { code: "MockFault".to_string(), message: message.to_string() }
}

impl MockEcsClient {
    /// Create a new mock client
    pub fn new(region_id: impl Into<String>) -> Self {
        Self {
            region_id: region_id.into(),
            instances: Arc::new(Mutex::new(BTreeMap::new())),
            client_tokens: Arc::new(Mutex::new(HashMap::new())),
            user_data: Arc::new(Mutex::new(HashMap::new())),
            hidden: Arc::new(Mutex::new(HashSet::new())),
            calls: Arc::new(Mutex::new(CallCounts::default())),
            faults: Arc::new(Mutex::new(Faults::default())),
            next_id: Arc::new(Mutex::new(1)),
        }
    }

    /// Add an instance to the mock store (for test setup)
    pub fn add_instance(&self, instance: Instance) {
        lock(&self.instances).insert(instance.id.clone(), instance);
    }

    /// Change the state of a stored instance
    pub fn set_instance_state(&self, instance_id: &str, state: &str) {
        if let Some(instance) = lock(&self.instances).get_mut(instance_id) {
            instance.state = state.to_string();
        }
    }

    pub fn instance(&self, instance_id: &str) -> Option<Instance> {
        lock(&self.instances).get(instance_id).cloned()
    }

    pub fn instances(&self) -> Vec<Instance> {
        lock(&self.instances).values().cloned().collect()
    }

    pub fn user_data(&self, instance_id: &str) -> Option<Vec<u8>> {
        lock(&self.user_data).get(instance_id).cloned()
    }

    /// Snapshot of the call counters
    pub fn calls(&self) -> CallCounts {
        lock(&self.calls).clone()
    }

    /// Make every `run_instance` fail with the given message, `None` to stop
    pub fn fail_run_instance(&self, message: Option<&str>) {
        lock(&self.faults).run_instance_error = message.map(str::to_string);
    }

    /// Make `run_instance` succeed without returning an instance
    pub fn run_instance_returns_none(&self, enabled: bool) {
        lock(&self.faults).run_instance_returns_none = enabled;
    }

    /// Created instances stay invisible to the next `find_instance`, and
    /// `run_instance` answers with the bare accepted instance
    pub fn hide_new_instances(&self, enabled: bool) {
        lock(&self.faults).hide_new_instances = enabled;
    }

    pub fn fail_find_instance(&self, message: Option<&str>) {
        lock(&self.faults).find_instance_error = message.map(str::to_string);
    }

    pub fn fail_terminate(&self, message: Option<&str>) {
        lock(&self.faults).terminate_error = message.map(str::to_string);
    }

    /// Make network reconciliation and teardown fail
    pub fn fail_network(&self, message: Option<&str>) {
        lock(&self.faults).network_error = message.map(str::to_string);
    }

    /// State given to instances created from now on
    pub fn set_new_instance_state(&self, state: &str) {
        lock(&self.faults).new_instance_state = state.to_string();
    }

    fn next_id(&self) -> u64 {
        let mut id = lock(&self.next_id);
        let current = *id;
        *id += 1;
        current
    }
}

#[async_trait::async_trait]
impl EcsClientTrait for MockEcsClient {
    fn region_id(&self) -> &str {
        &self.region_id
    }

    async fn validate_credentials(&self) -> Result<(), EcsError> {
        Ok(())
    }

    async fn run_instance(&self, request: &RunInstanceRequest) -> Result<Option<Instance>, EcsError> {
        lock(&self.calls).run_instance += 1;
        let faults = lock(&self.faults).clone();

        if let Some(message) = &faults.run_instance_error {
            return Err(fault(message));
        }
        if faults.run_instance_returns_none {
            return Ok(None);
        }

        if let Some(token) = &request.client_token {
            if let Some(existing) = lock(&self.client_tokens).get(token) {
                return Ok(self.instance(existing));
            }
        }

        let n = self.next_id();
        let instance = Instance {
            id: format!("i-mock{:06}", n),
            name: request.instance_name.clone().unwrap_or_default(),
            state: normalize_status(&faults.new_instance_state),
            region_id: if request.region_id.is_empty() { self.region_id.clone() } else { request.region_id.clone() },
            zone_id: request.zone_id.clone().unwrap_or_default(),
            instance_type: request.instance_type.clone(),
            image_id: request.image_id.clone(),
            private_ip_addresses: vec![format!("10.0.{}.{}", n / 256, n % 256)],
            public_ip_addresses: Vec::new(),
            tags: request.tags.clone(),
        };

        if let Some(token) = &request.client_token {
            lock(&self.client_tokens).insert(token.clone(), instance.id.clone());
        }
        if let Some(user_data) = &request.user_data {
            lock(&self.user_data).insert(instance.id.clone(), user_data.clone());
        }
        self.add_instance(instance.clone());
        if faults.hide_new_instances {
            lock(&self.hidden).insert(instance.id.clone());
            return Ok(Some(Instance::accepted(instance.id, request, &self.region_id)));
        }
        Ok(Some(instance))
    }

    async fn find_instance(&self, lookup: &InstanceLookup) -> Result<Option<Instance>, EcsError> {
        lock(&self.calls).find_instance += 1;
        if let Some(message) = &lock(&self.faults).find_instance_error {
            return Err(fault(message));
        }

        let found = {
            let instances = lock(&self.instances);
            if let Some(id) = &lookup.instance_id {
                instances.get(id).cloned()
            } else {
                let Some((key, value)) = &lookup.tag else {
                    return Err(EcsError::InvalidRequest(
                        "instance lookup needs an instance id or a tag".to_string(),
                    ));
                };
                instances.values().find(|i| i.tags.get(key) == Some(value)).cloned()
            }
        };
        match found {
            Some(instance) if lock(&self.hidden).remove(&instance.id) => Ok(None),
            other => Ok(other),
        }
    }

    async fn terminate_instance(&self, _region_id: &str, instance_id: &str) -> Result<(), EcsError> {
        lock(&self.calls).terminate_instance += 1;
        if let Some(message) = &lock(&self.faults).terminate_error {
            return Err(fault(message));
        }
        self.set_instance_state(instance_id, "Terminated");
        Ok(())
    }

    async fn reconcile_network(&self, request: &NetworkRequest) -> Result<NetworkStatus, EcsError> {
        lock(&self.calls).reconcile_network += 1;
        if let Some(message) = &lock(&self.faults).network_error {
            return Err(fault(message));
        }
        let Some(vpc_id) = &request.vpc_id else {
            return Err(EcsError::InvalidRequest(
                "automatic VPC creation is not supported, set networkSpec.vpcId".to_string(),
            ));
        };
        Ok(NetworkStatus { vpc_id: vpc_id.clone(), vswitch_ids: request.vswitch_ids.clone() })
    }

    async fn delete_network(&self, _request: &NetworkRequest) -> Result<(), EcsError> {
        lock(&self.calls).delete_network += 1;
        if let Some(message) = &lock(&self.faults).network_error {
            return Err(fault(message));
        }
        Ok(())
    }

    async fn reconcile_load_balancer(&self, request: &LoadBalancerRequest) -> Result<Option<String>, EcsError> {
        lock(&self.calls).reconcile_load_balancer += 1;
        Ok(request.load_balancer_id.clone())
    }

    async fn delete_load_balancer(&self, _request: &LoadBalancerRequest) -> Result<(), EcsError> {
        lock(&self.calls).delete_load_balancer += 1;
        Ok(())
    }
}

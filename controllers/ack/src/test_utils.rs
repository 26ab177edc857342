//! Test utilities for unit testing reconcilers
//!
//! `InMemoryStore` stands in for the API server, `RecordingEventPublisher`
//! captures events, and the `create_test_*` builders create a consistent object graph
//! (Cluster -> ACKCluster, Machine -> ACKMachine) for one namespace.

use crate::error::ControllerError;
use crate::events::EventPublisher;
use crate::metrics::Metrics;
use crate::reconciler::Reconciler;
use crate::store::{InfraKind, ObjectPatch, PatchOutcome, ResourceStore};
use crds::*;
use ecs_client::{EcsClientTrait, MockEcsClient};
use k8s_openapi::api::core::v1::ObjectReference as CoreObjectReference;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::runtime::events::EventType;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

pub const TEST_REGION: &str = "cn-hangzhou";

type Key = (String, String);

fn key(namespace: &str, name: &str) -> Key {
    (namespace.to_string(), name.to_string())
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct StoreState {
    ack_clusters: BTreeMap<Key, Value>,
    ack_machines: BTreeMap<Key, Value>,
    clusters: BTreeMap<Key, Cluster>,
    machines: BTreeMap<Key, Machine>,
    secrets: BTreeMap<Key, Vec<u8>>,
    next_resource_version: u64,
    patches: usize,
    conflict_next_patch: bool,
}

impl StoreState {
    fn bump(&mut self) -> String {
        self.next_resource_version += 1;
        self.next_resource_version.to_string()
    }

    fn objects(&mut self, kind: InfraKind) -> &mut BTreeMap<Key, Value> {
        match kind {
            InfraKind::Cluster => &mut self.ack_clusters,
            InfraKind::Machine => &mut self.ack_machines,
        }
    }
}

/// In-memory `ResourceStore`
///
/// Infrastructure objects are kept as JSON so patches apply exactly like a
/// JSON merge patch on the API server. Every write bumps the resource
/// version; a patch carrying a stale one is a conflict. An object with a
/// deletion timestamp disappears once its last finalizer is removed.
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<StoreState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert_infra<K: Serialize>(&self, kind: InfraKind, object: &K) {
        let mut state = lock(&self.state);
        let mut value = serde_json::to_value(object).unwrap();
        value["metadata"]["resourceVersion"] = Value::String(state.bump());
        let k = key(
            value["metadata"]["namespace"].as_str().unwrap_or_default(),
            value["metadata"]["name"].as_str().unwrap_or_default(),
        );
        state.objects(kind).insert(k, value);
    }

    fn get_infra<K: DeserializeOwned>(&self, kind: InfraKind, namespace: &str, name: &str) -> Option<K> {
        let mut state = lock(&self.state);
        state
            .objects(kind)
            .get(&key(namespace, name))
            .map(|v| serde_json::from_value(v.clone()).unwrap())
    }

    pub fn insert_ack_cluster(&self, ack_cluster: ACKCluster) {
        self.insert_infra(InfraKind::Cluster, &ack_cluster);
    }

    pub fn insert_ack_machine(&self, ack_machine: ACKMachine) {
        self.insert_infra(InfraKind::Machine, &ack_machine);
    }

    pub fn insert_cluster(&self, cluster: Cluster) {
        let k = key(&cluster.metadata.namespace.clone().unwrap_or_default(), &cluster.metadata.name.clone().unwrap_or_default());
        lock(&self.state).clusters.insert(k, cluster);
    }

    pub fn insert_machine(&self, machine: Machine) {
        let k = key(&machine.metadata.namespace.clone().unwrap_or_default(), &machine.metadata.name.clone().unwrap_or_default());
        lock(&self.state).machines.insert(k, machine);
    }

    pub fn insert_secret(&self, namespace: &str, name: &str, user_data: impl AsRef<[u8]>) {
        lock(&self.state).secrets.insert(key(namespace, name), user_data.as_ref().to_vec());
    }

    pub fn ack_cluster(&self, namespace: &str, name: &str) -> Option<ACKCluster> {
        self.get_infra(InfraKind::Cluster, namespace, name)
    }

    pub fn ack_machine(&self, namespace: &str, name: &str) -> Option<ACKMachine> {
        self.get_infra(InfraKind::Machine, namespace, name)
    }

    /// Sets the deletion timestamp, as the API server does on delete when finalizers are present
    pub fn mark_deleted(&self, kind: InfraKind, namespace: &str, name: &str) {
        let mut state = lock(&self.state);
        let rv = state.bump();
        if let Some(value) = state.objects(kind).get_mut(&key(namespace, name)) {
            value["metadata"]["deletionTimestamp"] = json!("2026-01-01T00:00:00Z");
            value["metadata"]["resourceVersion"] = Value::String(rv);
        }
    }

    /// Makes the next patch fail with a conflict
    pub fn conflict_next_patch(&self) {
        lock(&self.state).conflict_next_patch = true;
    }

    pub fn patch_count(&self) -> usize {
        lock(&self.state).patches
    }
}

fn finalizers_empty(value: &Value) -> bool {
    value["metadata"]["finalizers"]
        .as_array()
        .map(|f| f.is_empty())
        .unwrap_or(true)
}

#[async_trait::async_trait]
impl ResourceStore for InMemoryStore {
    async fn get_ack_cluster(&self, namespace: &str, name: &str) -> Result<Option<ACKCluster>, ControllerError> {
        Ok(self.ack_cluster(namespace, name))
    }

    async fn get_ack_machine(&self, namespace: &str, name: &str) -> Result<Option<ACKMachine>, ControllerError> {
        Ok(self.ack_machine(namespace, name))
    }

    async fn get_cluster(&self, namespace: &str, name: &str) -> Result<Option<Cluster>, ControllerError> {
        Ok(lock(&self.state).clusters.get(&key(namespace, name)).cloned())
    }

    async fn get_machine(&self, namespace: &str, name: &str) -> Result<Option<Machine>, ControllerError> {
        Ok(lock(&self.state).machines.get(&key(namespace, name)).cloned())
    }

    async fn get_bootstrap_data(&self, namespace: &str, secret_name: &str) -> Result<Option<Vec<u8>>, ControllerError> {
        Ok(lock(&self.state).secrets.get(&key(namespace, secret_name)).cloned())
    }

    async fn patch(
        &self,
        kind: InfraKind,
        namespace: &str,
        name: &str,
        patch: &ObjectPatch,
    ) -> Result<PatchOutcome, ControllerError> {
        let mut state = lock(&self.state);
        state.patches += 1;
        let what = format!("{} {}/{}", kind.as_str(), namespace, name);

        if std::mem::take(&mut state.conflict_next_patch) {
            return Err(ControllerError::Conflict(what));
        }
        let Some(mut current) = state.objects(kind).get(&key(namespace, name)).cloned() else {
            return Ok(PatchOutcome::Gone);
        };
        if let Some(expected) = &patch.resource_version {
            if current["metadata"]["resourceVersion"].as_str() != Some(expected.as_str()) {
                return Err(ControllerError::Conflict(what));
            }
        }

        for body in [&patch.main, &patch.status].into_iter().flatten() {
            json_patch::merge(&mut current, body);
        }
        let rv = state.bump();
        current["metadata"]["resourceVersion"] = Value::String(rv.clone());

        let deleted = !current["metadata"]["deletionTimestamp"].is_null() && finalizers_empty(&current);
        if deleted {
            state.objects(kind).remove(&key(namespace, name));
        } else {
            state.objects(kind).insert(key(namespace, name), current);
        }
        Ok(PatchOutcome::Applied { resource_version: Some(rv) })
    }
}

/// One captured event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    pub warning: bool,
    pub reason: String,
    pub note: Option<String>,
}

/// `EventPublisher` that keeps every event
#[derive(Default)]
pub struct RecordingEventPublisher {
    events: Mutex<Vec<RecordedEvent>>,
}

impl RecordingEventPublisher {
    pub fn events(&self) -> Vec<RecordedEvent> {
        lock(&self.events).clone()
    }

    pub fn count(&self, reason: &str) -> usize {
        lock(&self.events).iter().filter(|e| e.reason == reason).count()
    }
}

#[async_trait::async_trait]
impl EventPublisher for RecordingEventPublisher {
    async fn publish(
        &self,
        _resource_ref: &CoreObjectReference,
        type_: EventType,
        reason: &str,
        _action: &str,
        note: Option<String>,
    ) {
        lock(&self.events).push(RecordedEvent {
            warning: matches!(type_, EventType::Warning),
            reason: reason.to_string(),
            note,
        });
    }
}

fn owner(kind: &str, name: &str) -> OwnerReference {
    OwnerReference {
        api_version: format!("{}/v1beta1", CAPI_GROUP),
        kind: kind.to_string(),
        name: name.to_string(),
        uid: format!("uid-{}-{}", kind.to_lowercase(), name),
        ..Default::default()
    }
}

/// Cluster whose infrastructure reference points at an ACKCluster of the same name
pub fn create_test_cluster(name: &str, namespace: &str, infrastructure_ready: bool) -> Cluster {
    Cluster {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: ClusterSpec {
            paused: None,
            infrastructure_ref: Some(ObjectReference {
                api_version: Some(format!("{}/v1alpha3", INFRASTRUCTURE_GROUP)),
                kind: Some("ACKCluster".to_string()),
                name: name.to_string(),
                namespace: Some(namespace.to_string()),
            }),
        },
        status: Some(ClusterStatus { infrastructure_ready, phase: None }),
    }
}

/// ACKCluster owned by `cluster`, using an existing VPC
pub fn create_test_ack_cluster(name: &str, namespace: &str, cluster: &str) -> ACKCluster {
    ACKCluster {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            uid: Some(format!("uid-ackcluster-{}", name)),
            owner_references: Some(vec![owner("Cluster", cluster)]),
            ..Default::default()
        },
        spec: ACKClusterSpec {
            network_spec: NetworkSpec {
                vpc_id: Some("vpc-test".to_string()),
                worker_vswitch_ids: vec!["vsw-test".to_string()],
                ..Default::default()
            },
            tags: vec![Tag { key: "cluster".to_string(), value: cluster.to_string() }],
            ..Default::default()
        },
        status: None,
    }
}

/// Machine in `cluster` with an optional bootstrap data secret
pub fn create_test_machine(name: &str, namespace: &str, cluster: &str, data_secret: Option<&str>) -> Machine {
    Machine {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(BTreeMap::from([(CLUSTER_NAME_LABEL.to_string(), cluster.to_string())])),
            ..Default::default()
        },
        spec: MachineSpec {
            cluster_name: cluster.to_string(),
            bootstrap: Bootstrap { config_ref: None, data_secret_name: data_secret.map(str::to_string) },
            ..Default::default()
        },
        status: None,
    }
}

/// ACKMachine owned by `machine`
pub fn create_test_ack_machine(name: &str, namespace: &str, machine: &str) -> ACKMachine {
    ACKMachine {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            uid: Some(format!("uid-ackmachine-{}", name)),
            owner_references: Some(vec![owner("Machine", machine)]),
            ..Default::default()
        },
        spec: ACKMachineSpec {
            zone_id: "cn-hangzhou-h".to_string(),
            instance_type: "ecs.g6.large".to_string(),
            image_id: "centos_7_9_x64_20G_alibase_20230919.vhd".to_string(),
            ..Default::default()
        },
        status: None,
    }
}

/// Stores a full machine graph in `default`: Cluster and ACKCluster "c",
/// Machine and ACKMachine `name`, plus the bootstrap secret when `with_secret`.
pub fn seed_machine(store: &InMemoryStore, name: &str, infrastructure_ready: bool, with_secret: bool) {
    let secret = format!("{}-bootstrap", name);
    store.insert_cluster(create_test_cluster("c", "default", infrastructure_ready));
    store.insert_ack_cluster(create_test_ack_cluster("c", "default", "c"));
    store.insert_machine(create_test_machine(name, "default", "c", Some(&secret)));
    store.insert_ack_machine(create_test_ack_machine(name, "default", name));
    if with_secret {
        store.insert_secret("default", &secret, "#cloud-config\nruncmd: []\n");
    }
}

/// Reconciler wired to an in-memory store, a mock ECS client and a recording publisher
pub fn create_test_reconciler() -> (Reconciler, Arc<InMemoryStore>, MockEcsClient, Arc<RecordingEventPublisher>) {
    let store = Arc::new(InMemoryStore::new());
    let ecs = MockEcsClient::new(TEST_REGION);
    let events = Arc::new(RecordingEventPublisher::default());
    let ecs_client: Arc<dyn EcsClientTrait> = Arc::new(ecs.clone());
    let reconciler = Reconciler::new(
        store.clone(),
        ecs_client,
        events.clone(),
        Metrics::new().unwrap(),
        Duration::from_secs(5),
        TEST_REGION,
    );
    (reconciler, store, ecs, events)
}

use super::ObjectStore;
use crate::error::{ControllerError, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use stresswatch_core::{AnnotationPatch, NetworkChaos, Resource, ResourceKey, ResourceVersion};
use tokio::sync::RwLock;
use tracing::debug;

/// A patch request as received by [`MockObjectStore`], whether or not it
/// was accepted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchCall {
    pub key: ResourceKey,
    pub patch: AnnotationPatch,
    pub expected: ResourceVersion,
}

#[derive(Default)]
struct MockState {
    pods: HashMap<ResourceKey, Pod>,
    fault_resources: HashMap<ResourceKey, NetworkChaos>,
    next_version: u64,
    pending_conflicts: HashMap<ResourceKey, u32>,
    patch_calls: Vec<PatchCall>,
    read_latency: Option<Duration>,
}

impl MockState {
    fn bump_version(&mut self) -> ResourceVersion {
        self.next_version += 1;
        ResourceVersion::new(self.next_version.to_string())
    }
}

/// In-memory object store for tests
///
/// Records every patch call, can simulate a concurrent writer by failing the
/// next N patches of an object with a conflict (bumping its version each
/// time), and can delay reads to exercise reconcile deadlines.
#[derive(Clone, Default)]
pub struct MockObjectStore {
    state: Arc<RwLock<MockState>>,
}

impl MockObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a Pod, assigning a fresh resource version
    pub async fn insert_pod(&self, mut pod: Pod) -> Result<ResourceVersion> {
        let key = key_of(&pod)?;
        let mut state = self.state.write().await;
        let version = state.bump_version();
        pod.set_resource_version(version.clone());
        state.pods.insert(key, pod);
        Ok(version)
    }

    /// Insert or replace a fault resource, assigning a fresh resource version
    pub async fn insert_fault_resource(&self, mut chaos: NetworkChaos) -> Result<ResourceVersion> {
        let key = key_of(&chaos)?;
        let mut state = self.state.write().await;
        let version = state.bump_version();
        chaos.set_resource_version(version.clone());
        state.fault_resources.insert(key, chaos);
        Ok(version)
    }

    pub async fn remove_pod(&self, namespace: &str, name: &str) -> Option<Pod> {
        let mut state = self.state.write().await;
        state.pods.remove(&ResourceKey::pod(namespace, name))
    }

    /// Fail the next `count` patches of `key` with a conflict
    pub async fn inject_conflicts(&self, key: ResourceKey, count: u32) {
        let mut state = self.state.write().await;
        state.pending_conflicts.insert(key, count);
    }

    /// Delay every subsequent read by `latency`
    pub async fn set_read_latency(&self, latency: Duration) {
        self.state.write().await.read_latency = Some(latency);
    }

    pub async fn patch_calls(&self) -> Vec<PatchCall> {
        self.state.read().await.patch_calls.clone()
    }

    pub async fn patch_calls_for(&self, key: &ResourceKey) -> Vec<PatchCall> {
        self.state
            .read()
            .await
            .patch_calls
            .iter()
            .filter(|c| &c.key == key)
            .cloned()
            .collect()
    }

    pub async fn clear_patch_calls(&self) {
        self.state.write().await.patch_calls.clear();
    }

    /// Current stored Pod, bypassing read latency
    pub async fn pod(&self, namespace: &str, name: &str) -> Option<Pod> {
        let state = self.state.read().await;
        state.pods.get(&ResourceKey::pod(namespace, name)).cloned()
    }

    /// Current stored fault resource, bypassing read latency
    pub async fn fault_resource(&self, namespace: &str, name: &str) -> Option<NetworkChaos> {
        let state = self.state.read().await;
        state
            .fault_resources
            .get(&ResourceKey::network_chaos(namespace, name))
            .cloned()
    }

    async fn simulate_read_latency(&self) {
        let latency = self.state.read().await.read_latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }
}

fn key_of<T: Resource>(resource: &T) -> Result<ResourceKey> {
    resource
        .resource_key()
        .map_err(|e| ControllerError::internal_error(e.to_string()))
}

fn apply_patch<T: Resource>(
    objects: &mut HashMap<ResourceKey, T>,
    pending_conflicts: &mut HashMap<ResourceKey, u32>,
    next_version: &mut u64,
    key: &ResourceKey,
    patch: &AnnotationPatch,
    expected: &ResourceVersion,
) -> Result<ResourceVersion> {
    let object = objects
        .get_mut(key)
        .ok_or_else(|| ControllerError::not_found(key))?;

    if let Some(remaining) = pending_conflicts.get_mut(key).filter(|n| **n > 0) {
        *remaining -= 1;
        *next_version += 1;
        object.set_resource_version(ResourceVersion::new(next_version.to_string()));
        debug!("Mock: injected conflict on {}", key);
        return Err(ControllerError::conflict(key, expected));
    }

    if object.resource_version().as_ref() != Some(expected) {
        return Err(ControllerError::conflict(key, expected));
    }

    patch.apply_to(object.metadata_mut());
    *next_version += 1;
    let version = ResourceVersion::new(next_version.to_string());
    object.set_resource_version(version.clone());
    debug!("Mock: patched {} to version {}", key, version);
    Ok(version)
}

#[async_trait]
impl ObjectStore for MockObjectStore {
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>> {
        self.simulate_read_latency().await;
        Ok(self.pod(namespace, name).await)
    }

    async fn list_pods(&self, namespace: Option<&str>) -> Result<Vec<Pod>> {
        self.simulate_read_latency().await;
        let state = self.state.read().await;
        let mut pods: Vec<(&ResourceKey, &Pod)> = state
            .pods
            .iter()
            .filter(|(key, _)| namespace.is_none_or(|ns| key.namespace == ns))
            .collect();
        pods.sort_by(|a, b| a.0.cmp(b.0));
        Ok(pods.into_iter().map(|(_, pod)| pod.clone()).collect())
    }

    async fn list_fault_resources(&self, namespace: &str) -> Result<Vec<NetworkChaos>> {
        self.simulate_read_latency().await;
        let state = self.state.read().await;
        let mut resources: Vec<(&ResourceKey, &NetworkChaos)> = state
            .fault_resources
            .iter()
            .filter(|(key, _)| key.namespace == namespace)
            .collect();
        resources.sort_by(|a, b| a.0.cmp(b.0));
        Ok(resources.into_iter().map(|(_, c)| c.clone()).collect())
    }

    async fn get_fault_resource(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<NetworkChaos>> {
        self.simulate_read_latency().await;
        Ok(self.fault_resource(namespace, name).await)
    }

    async fn patch_pod(
        &self,
        namespace: &str,
        name: &str,
        patch: &AnnotationPatch,
        expected: &ResourceVersion,
    ) -> Result<ResourceVersion> {
        let key = ResourceKey::pod(namespace, name);
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        state.patch_calls.push(PatchCall {
            key: key.clone(),
            patch: patch.clone(),
            expected: expected.clone(),
        });
        apply_patch(
            &mut state.pods,
            &mut state.pending_conflicts,
            &mut state.next_version,
            &key,
            patch,
            expected,
        )
    }

    async fn patch_fault_resource(
        &self,
        namespace: &str,
        name: &str,
        patch: &AnnotationPatch,
        expected: &ResourceVersion,
    ) -> Result<ResourceVersion> {
        let key = ResourceKey::network_chaos(namespace, name);
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        state.patch_calls.push(PatchCall {
            key: key.clone(),
            patch: patch.clone(),
            expected: expected.clone(),
        });
        apply_patch(
            &mut state.fault_resources,
            &mut state.pending_conflicts,
            &mut state.next_version,
            &key,
            patch,
            expected,
        )
    }
}

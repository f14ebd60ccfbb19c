//! Embedded object store for standalone operation.
//!
//! Objects are kept as JSON in a [`KVStore`] under their storage key. The
//! resource version is a counter persisted in the same database and bumped
//! inside the write transaction of every mutation, so a conditional patch is
//! a single compare-and-swap. Each mutation is published on a broadcast
//! channel, which is what drives the controller in this mode.

use super::ObjectStore;
use crate::error::{ControllerError, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use stresswatch_core::{
    AnnotationPatch, GroupVersionKind, NetworkChaos, Resource, ResourceEvent, ResourceKey,
    ResourceVersion, StressWatchError,
};
use stresswatch_storage::encoding::RESOURCE_VERSION_KEY;
use stresswatch_storage::{KVStore, KeyEncoder, RedbBackend, Transaction};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Capacity of the mutation event channel
const EVENT_CAPACITY: usize = 4096;

/// Namespace given to manifest objects that do not name one
const DEFAULT_NAMESPACE: &str = "default";

pub struct LocalObjectStore {
    storage: Arc<dyn KVStore>,
    event_tx: broadcast::Sender<ResourceEvent>,
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value).map_err(|e| {
        StressWatchError::serialization_error(
            format!("Failed to serialize object: {}", e),
            Some(Box::new(e)),
        )
        .into()
    })
}

fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
    serde_json::from_slice(data).map_err(|e| {
        StressWatchError::serialization_error(
            format!("Failed to deserialize stored object: {}", e),
            Some(Box::new(e)),
        )
        .into()
    })
}

fn next_version(txn: &mut dyn Transaction) -> Result<ResourceVersion> {
    let current = match txn.get(RESOURCE_VERSION_KEY)? {
        Some(raw) => std::str::from_utf8(&raw)
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .ok_or_else(|| ControllerError::internal_error("Corrupt resource version counter"))?,
        None => 0,
    };
    let next = current + 1;
    txn.put(RESOURCE_VERSION_KEY, next.to_string().as_bytes())?;
    Ok(ResourceVersion::new(next.to_string()))
}

impl LocalObjectStore {
    pub fn new(storage: Arc<dyn KVStore>) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { storage, event_tx }
    }

    /// Open (or create) a redb database at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let backend = RedbBackend::new(path)?;
        Ok(Self::new(Arc::new(backend)))
    }

    /// Subscribe to mutation events
    pub fn subscribe(&self) -> broadcast::Receiver<ResourceEvent> {
        self.event_tx.subscribe()
    }

    /// Create or replace a Pod
    pub fn apply_pod(&self, pod: Pod) -> Result<Pod> {
        self.apply(pod)
    }

    /// Create or replace a fault resource
    pub fn apply_fault_resource(&self, chaos: NetworkChaos) -> Result<NetworkChaos> {
        self.apply(chaos)
    }

    /// Delete an object. Returns whether it existed.
    pub fn delete(&self, key: &ResourceKey) -> Result<bool> {
        let storage_key = KeyEncoder::encode_resource_key(key);
        let mut txn = self.storage.transaction()?;
        let Some(previous) = txn.get(storage_key.as_bytes())? else {
            txn.rollback()?;
            return Ok(false);
        };
        let version = next_version(txn.as_mut())?;
        txn.delete(storage_key.as_bytes())?;
        txn.commit()?;

        info!("Deleted {} at version {}", key, version);
        if let Ok(object) = serde_json::from_slice::<serde_json::Value>(&previous) {
            let _ = self
                .event_tx
                .send(ResourceEvent::deleted(key.clone(), object, version.0));
        }
        Ok(true)
    }

    /// Apply every Pod and NetworkChaos in a multi-document YAML manifest.
    /// Other kinds are skipped. Returns the number of objects applied.
    pub fn load_manifest(&self, data: &str) -> Result<usize> {
        let mut applied = 0;
        for mut doc in stresswatch_core::yaml_documents(data)? {
            if !doc.is_object() {
                warn!("Skipping manifest document that is not an object");
                continue;
            }
            let api_version = doc["apiVersion"].as_str().unwrap_or_default().to_string();
            let kind = doc["kind"].as_str().unwrap_or_default().to_string();
            let gvk = GroupVersionKind::from_api_version_kind(&api_version, &kind);

            if let Some(metadata) = doc.get_mut("metadata").and_then(|m| m.as_object_mut()) {
                metadata
                    .entry("namespace")
                    .or_insert_with(|| DEFAULT_NAMESPACE.into());
            }

            if gvk == GroupVersionKind::pod() {
                self.apply_pod(from_manifest(doc)?)?;
            } else if gvk == GroupVersionKind::network_chaos() {
                self.apply_fault_resource(from_manifest(doc)?)?;
            } else {
                warn!("Skipping unsupported manifest object {}", gvk);
                continue;
            }
            applied += 1;
        }
        Ok(applied)
    }

    /// Read and apply a manifest file
    pub fn load_manifest_file(&self, path: &Path) -> Result<usize> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            ControllerError::invalid_config(
                format!("failed to read manifest {}: {}", path.display(), e),
                "Ensure every --manifest path exists and is readable",
            )
        })?;
        let applied = self.load_manifest(&data)?;
        info!("Loaded {} objects from {}", applied, path.display());
        Ok(applied)
    }

    fn apply<T: Resource>(&self, mut resource: T) -> Result<T> {
        resource.validate().map_err(|e| {
            StressWatchError::invalid_resource(
                e.to_string(),
                "Objects need a DNS-compatible metadata.name and metadata.namespace",
            )
        })?;
        let key = resource
            .resource_key()
            .map_err(|e| ControllerError::internal_error(e.to_string()))?;
        let storage_key = KeyEncoder::encode_resource_key(&key);

        let mut txn = self.storage.transaction()?;
        let existing: Option<T> = match txn.get(storage_key.as_bytes())? {
            Some(data) => Some(decode(&data)?),
            None => None,
        };

        let metadata = resource.metadata_mut();
        match &existing {
            Some(previous) => {
                metadata.uid = previous.metadata().uid.clone();
                metadata.creation_timestamp = previous.metadata().creation_timestamp.clone();
            }
            None => {
                metadata.uid.get_or_insert_with(|| Uuid::new_v4().to_string());
                metadata
                    .creation_timestamp
                    .get_or_insert_with(|| Time(chrono::Utc::now()));
            }
        }

        let version = next_version(txn.as_mut())?;
        resource.set_resource_version(version.clone());
        let data = encode(&resource)?;
        txn.put(storage_key.as_bytes(), &data)?;
        txn.commit()?;

        debug!("Applied {} at version {}", key, version);
        if let Ok(object) = serde_json::to_value(&resource) {
            let event = if existing.is_some() {
                ResourceEvent::modified(key, object, version.0)
            } else {
                ResourceEvent::added(key, object, version.0)
            };
            let _ = self.event_tx.send(event);
        }

        Ok(resource)
    }

    fn get<T: Resource>(&self, key: &ResourceKey) -> Result<Option<T>> {
        let storage_key = KeyEncoder::encode_resource_key(key);
        match self.storage.get(storage_key.as_bytes())? {
            Some(data) => Ok(Some(decode(&data)?)),
            None => Ok(None),
        }
    }

    fn list<T: Resource>(&self, namespace: Option<&str>) -> Result<Vec<T>> {
        let prefix = KeyEncoder::encode_prefix(&T::gvk(), namespace);
        debug!("Listing objects with prefix: {}", prefix);

        let mut objects = Vec::new();
        for (key, data) in self.storage.scan(prefix.as_bytes())? {
            match decode::<T>(&data) {
                Ok(object) => objects.push(object),
                Err(e) => warn!(
                    "Skipping undecodable object {}: {}",
                    String::from_utf8_lossy(&key),
                    e
                ),
            }
        }
        Ok(objects)
    }

    fn patch<T: Resource>(
        &self,
        key: &ResourceKey,
        patch: &AnnotationPatch,
        expected: &ResourceVersion,
    ) -> Result<ResourceVersion> {
        let storage_key = KeyEncoder::encode_resource_key(key);
        let mut txn = self.storage.transaction()?;

        let Some(data) = txn.get(storage_key.as_bytes())? else {
            txn.rollback()?;
            return Err(ControllerError::not_found(key));
        };
        let mut object: T = decode(&data)?;

        if object.resource_version().as_ref() != Some(expected) {
            txn.rollback()?;
            return Err(ControllerError::conflict(key, expected));
        }

        patch.apply_to(object.metadata_mut());
        let version = next_version(txn.as_mut())?;
        object.set_resource_version(version.clone());
        txn.put(storage_key.as_bytes(), &encode(&object)?)?;
        txn.commit()?;

        debug!("Patched {} to version {}", key, version);
        if let Ok(value) = serde_json::to_value(&object) {
            let _ = self
                .event_tx
                .send(ResourceEvent::modified(key.clone(), value, version.0.clone()));
        }
        Ok(version)
    }
}

fn from_manifest<T: DeserializeOwned>(doc: serde_json::Value) -> Result<T> {
    serde_json::from_value(doc).map_err(|e| {
        StressWatchError::serialization_error(
            format!("Invalid manifest object: {}", e),
            Some(Box::new(e)),
        )
        .into()
    })
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>> {
        self.get(&ResourceKey::pod(namespace, name))
    }

    async fn list_pods(&self, namespace: Option<&str>) -> Result<Vec<Pod>> {
        self.list(namespace)
    }

    async fn list_fault_resources(&self, namespace: &str) -> Result<Vec<NetworkChaos>> {
        self.list(Some(namespace))
    }

    async fn get_fault_resource(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<NetworkChaos>> {
        self.get(&ResourceKey::network_chaos(namespace, name))
    }

    async fn patch_pod(
        &self,
        namespace: &str,
        name: &str,
        patch: &AnnotationPatch,
        expected: &ResourceVersion,
    ) -> Result<ResourceVersion> {
        self.patch::<Pod>(&ResourceKey::pod(namespace, name), patch, expected)
    }

    async fn patch_fault_resource(
        &self,
        namespace: &str,
        name: &str,
        patch: &AnnotationPatch,
        expected: &ResourceVersion,
    ) -> Result<ResourceVersion> {
        self.patch::<NetworkChaos>(&ResourceKey::network_chaos(namespace, name), patch, expected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stresswatch_core::{WatchEventType, PAUSE_ANNOTATION, TEST_INSTANCE_LABEL};
    use tempfile::tempdir;

    fn make_store() -> (tempfile::TempDir, LocalObjectStore) {
        let dir = tempdir().unwrap();
        let store = LocalObjectStore::open(dir.path().join("objects.redb")).unwrap();
        (dir, store)
    }

    fn make_pod(namespace: &str, name: &str) -> Pod {
        let mut pod = Pod::default();
        pod.metadata.namespace = Some(namespace.to_string());
        pod.metadata.name = Some(name.to_string());
        pod
    }

    #[tokio::test]
    async fn test_apply_assigns_identity_and_versions() {
        let (_dir, store) = make_store();

        let first = store.apply_pod(make_pod("ns", "p1")).unwrap();
        let uid = first.metadata.uid.clone().unwrap();
        assert!(first.metadata.creation_timestamp.is_some());
        let v1 = first.resource_version().unwrap();

        let second = store.apply_pod(make_pod("ns", "p1")).unwrap();
        assert_eq!(second.metadata.uid.as_deref(), Some(uid.as_str()));
        assert_ne!(second.resource_version().unwrap(), v1);

        let stored = store.get_pod("ns", "p1").await.unwrap().unwrap();
        assert_eq!(stored.resource_version(), second.resource_version());
    }

    #[tokio::test]
    async fn test_apply_rejects_invalid_names() {
        let (_dir, store) = make_store();
        assert!(store.apply_pod(make_pod("ns", "Not_Valid")).is_err());
        assert!(store.apply_pod(Pod::default()).is_err());
    }

    #[tokio::test]
    async fn test_conditional_patch() {
        let (_dir, store) = make_store();
        let chaos = store
            .apply_fault_resource(NetworkChaos::new("ns", "f1").paused())
            .unwrap();
        let v1 = chaos.resource_version().unwrap();

        let err = store
            .patch_fault_resource("ns", "f1", &AnnotationPatch::clear_pause(), &ResourceVersion::new("999"))
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::Conflict { .. }));
        assert!(store.get_fault_resource("ns", "f1").await.unwrap().unwrap().is_paused());

        let v2 = store
            .patch_fault_resource("ns", "f1", &AnnotationPatch::clear_pause(), &v1)
            .await
            .unwrap();
        let stored = store.get_fault_resource("ns", "f1").await.unwrap().unwrap();
        assert!(!stored.is_paused());
        assert_eq!(stored.resource_version(), Some(v2));

        let err = store
            .patch_pod("ns", "ghost", &AnnotationPatch::mark_chaos_started(), &v1)
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_list_scoped_by_kind_and_namespace() {
        let (_dir, store) = make_store();
        store.apply_pod(make_pod("ns", "p1")).unwrap();
        store.apply_pod(make_pod("other", "p2")).unwrap();
        store.apply_fault_resource(NetworkChaos::new("ns", "f1")).unwrap();

        assert_eq!(store.list_pods(None).await.unwrap().len(), 2);
        assert_eq!(store.list_pods(Some("ns")).await.unwrap().len(), 1);
        assert_eq!(store.list_fault_resources("ns").await.unwrap().len(), 1);
        assert!(store.list_fault_resources("other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mutations_publish_events() {
        let (_dir, store) = make_store();
        let mut rx = store.subscribe();

        let pod = store.apply_pod(make_pod("ns", "p1")).unwrap();
        store.apply_pod(make_pod("ns", "p1")).unwrap();
        store
            .patch_pod(
                "ns",
                "p1",
                &AnnotationPatch::mark_chaos_started(),
                &store.get_pod("ns", "p1").await.unwrap().unwrap().resource_version().unwrap(),
            )
            .await
            .unwrap();
        assert!(store.delete(&ResourceKey::pod("ns", "p1")).unwrap());
        assert!(!store.delete(&ResourceKey::pod("ns", "p1")).unwrap());

        let added = rx.recv().await.unwrap();
        assert!(matches!(added.event_type, WatchEventType::Added));
        assert_eq!(added.resource_key, ResourceKey::pod("ns", "p1"));
        assert_eq!(Some(added.resource_version), pod.metadata.resource_version);

        assert!(matches!(rx.recv().await.unwrap().event_type, WatchEventType::Modified));
        assert!(matches!(rx.recv().await.unwrap().event_type, WatchEventType::Modified));
        assert!(matches!(rx.recv().await.unwrap().event_type, WatchEventType::Deleted));
    }

    #[tokio::test]
    async fn test_load_manifest() {
        let (_dir, store) = make_store();
        let manifest = format!(
            r#"
apiVersion: v1
kind: Pod
metadata:
  name: p1
  labels:
    chaos: "true"
    {instance}: t1
status:
  phase: Running
---
apiVersion: chaos-mesh.org/v1alpha1
kind: NetworkChaos
metadata:
  name: f1
  namespace: stress
  annotations:
    {pause}: "true"
spec:
  action: delay
  selector:
    labelSelectors:
      {instance}: t1
---
apiVersion: v1
kind: ConfigMap
metadata:
  name: ignored
"#,
            instance = TEST_INSTANCE_LABEL,
            pause = PAUSE_ANNOTATION,
        );

        assert_eq!(store.load_manifest(&manifest).unwrap(), 2);

        let pod = store.get_pod("default", "p1").await.unwrap().unwrap();
        assert_eq!(
            stresswatch_core::PodPhase::of(&pod),
            stresswatch_core::PodPhase::Running
        );

        let chaos = store.get_fault_resource("stress", "f1").await.unwrap().unwrap();
        assert!(chaos.is_paused());
        assert_eq!(chaos.test_instance(), Some("t1"));
        assert_eq!(chaos.spec.extra.get("action"), Some(&serde_json::json!("delay")));
    }
}

pub mod api;
pub mod local;
pub mod mock;

pub use api::ApiObjectStore;
pub use local::LocalObjectStore;
pub use mock::{MockObjectStore, PatchCall};

use crate::error::Result;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use stresswatch_core::{AnnotationPatch, NetworkChaos, ResourceVersion};

/// Access to the Pods and fault resources the controller reconciles.
///
/// Patches are conditional: they apply only if the object's current
/// `resourceVersion` still equals `expected`, otherwise they fail with
/// `ControllerError::Conflict`. Patching a missing object fails with
/// `ControllerError::NotFound`; reads return `None` instead.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch one Pod
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Option<Pod>>;

    /// List Pods in `namespace`, or in every namespace when `None`
    async fn list_pods(&self, namespace: Option<&str>) -> Result<Vec<Pod>>;

    /// List the fault resources in a namespace
    async fn list_fault_resources(&self, namespace: &str) -> Result<Vec<NetworkChaos>>;

    /// Fetch one fault resource
    async fn get_fault_resource(&self, namespace: &str, name: &str)
        -> Result<Option<NetworkChaos>>;

    /// Apply an annotation patch to a Pod, returning its new version
    async fn patch_pod(
        &self,
        namespace: &str,
        name: &str,
        patch: &AnnotationPatch,
        expected: &ResourceVersion,
    ) -> Result<ResourceVersion>;

    /// Apply an annotation patch to a fault resource, returning its new version
    async fn patch_fault_resource(
        &self,
        namespace: &str,
        name: &str,
        patch: &AnnotationPatch,
        expected: &ResourceVersion,
    ) -> Result<ResourceVersion>;
}

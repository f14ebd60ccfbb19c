use serde::{Deserialize, Serialize};
use std::fmt;

/// GroupVersionKind uniquely identifies a Kubernetes resource type
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupVersionKind {
    /// API group (e.g., "", "chaos-mesh.org")
    pub group: String,
    /// API version (e.g., "v1", "v1alpha1")
    pub version: String,
    /// Resource kind (e.g., "Pod", "NetworkChaos")
    pub kind: String,
}

impl GroupVersionKind {
    /// Create a new GVK
    pub fn new(
        group: impl Into<String>,
        version: impl Into<String>,
        kind: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            kind: kind.into(),
        }
    }

    /// Core `v1/Pod`
    pub fn pod() -> Self {
        Self::new("", "v1", "Pod")
    }

    /// `chaos-mesh.org/v1alpha1/NetworkChaos`
    pub fn network_chaos() -> Self {
        Self::new("chaos-mesh.org", "v1alpha1", "NetworkChaos")
    }

    /// Create a GVK from apiVersion and kind
    /// apiVersion format: "v1" or "group/version"
    pub fn from_api_version_kind(api_version: &str, kind: &str) -> Self {
        let (group, version) = match api_version.split_once('/') {
            Some((g, v)) => (g.to_string(), v.to_string()),
            None => (String::new(), api_version.to_string()),
        };

        Self {
            group,
            version,
            kind: kind.to_string(),
        }
    }

    /// Get the apiVersion string (group/version or just version)
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    /// Get the full API path segment
    pub fn api_path(&self) -> String {
        if self.group.is_empty() {
            format!("api/{}", self.version)
        } else {
            format!("apis/{}/{}", self.group, self.version)
        }
    }

    /// Get the resource name (lowercase, plural)
    pub fn resource_name(&self) -> String {
        let lower = self.kind.to_lowercase();
        // Chaos Mesh registers its kinds with an identical singular and plural
        if self.group == "chaos-mesh.org" {
            return lower;
        }
        if lower.ends_with('s') {
            format!("{}es", lower)
        } else if let Some(stem) = lower.strip_suffix('y') {
            format!("{}ies", stem)
        } else {
            format!("{}s", lower)
        }
    }
}

impl fmt::Display for GroupVersionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.api_version(), self.kind)
    }
}

/// ResourceKey uniquely identifies a specific resource instance
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceKey {
    /// GroupVersionKind of the resource
    pub gvk: GroupVersionKind,
    /// Namespace (empty for cluster-scoped resources)
    pub namespace: String,
    /// Resource name
    pub name: String,
}

impl ResourceKey {
    /// Create a new ResourceKey
    pub fn new(
        gvk: GroupVersionKind,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            gvk,
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of a Pod
    pub fn pod(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(GroupVersionKind::pod(), namespace, name)
    }

    /// Key of a NetworkChaos
    pub fn network_chaos(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(GroupVersionKind::network_chaos(), namespace, name)
    }

    /// Check if this is a namespaced resource
    pub fn is_namespaced(&self) -> bool {
        !self.namespace.is_empty()
    }

    /// Get the storage key encoding: {api_version}/{kind}/{namespace}/{name}
    /// For cluster-scoped: {api_version}/{kind}/{name}
    pub fn storage_key(&self) -> String {
        let api_version = self.gvk.api_version();
        if self.is_namespaced() {
            format!(
                "{}/{}/{}/{}",
                api_version, self.gvk.kind, self.namespace, self.name
            )
        } else {
            format!("{}/{}/{}", api_version, self.gvk.kind, self.name)
        }
    }

    /// Get the API path for this resource
    pub fn api_path(&self) -> String {
        format!("{}/{}", self.collection_path(), self.name)
    }

    /// Get the API path for the collection (without name)
    pub fn collection_path(&self) -> String {
        let base = self.gvk.api_path();
        let resource = self.gvk.resource_name();

        if self.is_namespaced() {
            format!("/{}/namespaces/{}/{}", base, self.namespace, resource)
        } else {
            format!("/{}/{}", base, resource)
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_namespaced() {
            write!(f, "{}/{}/{}", self.gvk.kind, self.namespace, self.name)
        } else {
            write!(f, "{}/{}", self.gvk.kind, self.name)
        }
    }
}

/// Opaque optimistic-concurrency token (`metadata.resourceVersion`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceVersion(pub String);

impl ResourceVersion {
    pub fn new(version: impl Into<String>) -> Self {
        Self(version.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ResourceVersion {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ResourceVersion {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gvk_from_api_version() {
        let gvk = GroupVersionKind::from_api_version_kind("v1", "Pod");
        assert_eq!(gvk, GroupVersionKind::pod());
        assert_eq!(gvk.api_version(), "v1");

        let gvk = GroupVersionKind::from_api_version_kind("chaos-mesh.org/v1alpha1", "NetworkChaos");
        assert_eq!(gvk.group, "chaos-mesh.org");
        assert_eq!(gvk.version, "v1alpha1");
        assert_eq!(gvk, GroupVersionKind::network_chaos());
    }

    #[test]
    fn test_gvk_resource_name() {
        assert_eq!(GroupVersionKind::pod().resource_name(), "pods");
        assert_eq!(GroupVersionKind::network_chaos().resource_name(), "networkchaos");
        assert_eq!(
            GroupVersionKind::new("", "v1", "Policy").resource_name(),
            "policies"
        );
    }

    #[test]
    fn test_resource_key_storage_key() {
        let key = ResourceKey::pod("default", "nginx");
        assert_eq!(key.storage_key(), "v1/Pod/default/nginx");

        let key = ResourceKey::network_chaos("stress", "delay");
        assert_eq!(
            key.storage_key(),
            "chaos-mesh.org/v1alpha1/NetworkChaos/stress/delay"
        );
    }

    #[test]
    fn test_resource_key_api_path() {
        let key = ResourceKey::pod("default", "nginx");
        assert_eq!(key.api_path(), "/api/v1/namespaces/default/pods/nginx");

        let key = ResourceKey::network_chaos("stress", "delay");
        assert_eq!(
            key.api_path(),
            "/apis/chaos-mesh.org/v1alpha1/namespaces/stress/networkchaos/delay"
        );
        assert_eq!(
            key.collection_path(),
            "/apis/chaos-mesh.org/v1alpha1/namespaces/stress/networkchaos"
        );
    }

    #[test]
    fn test_resource_key_display() {
        assert_eq!(ResourceKey::pod("ns", "p1").to_string(), "Pod/ns/p1");
    }
}

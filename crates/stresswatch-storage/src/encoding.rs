use stresswatch_core::{GroupVersionKind, ResourceKey};

/// Key under which the resource version counter is persisted. It sits
/// outside every `{api_version}/{kind}/` prefix so scans never return it.
pub const RESOURCE_VERSION_KEY: &[u8] = b"meta:resource-version";

/// Key encoder for storage keys
pub struct KeyEncoder;

impl KeyEncoder {
    /// Encode a resource key: {api_version}/{kind}/{namespace}/{name}
    pub fn encode_resource_key(key: &ResourceKey) -> String {
        key.storage_key()
    }

    /// Encode a prefix for scanning resources of a kind, optionally within a namespace
    pub fn encode_prefix(gvk: &GroupVersionKind, namespace: Option<&str>) -> String {
        match namespace {
            Some(ns) => format!("{}/{}/{}/", gvk.api_version(), gvk.kind, ns),
            None => format!("{}/{}/", gvk.api_version(), gvk.kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_resource_key() {
        let key = ResourceKey::pod("default", "nginx");
        assert_eq!(KeyEncoder::encode_resource_key(&key), "v1/Pod/default/nginx");
    }

    #[test]
    fn test_encode_prefix() {
        assert_eq!(
            KeyEncoder::encode_prefix(&GroupVersionKind::pod(), Some("default")),
            "v1/Pod/default/"
        );
        assert_eq!(
            KeyEncoder::encode_prefix(&GroupVersionKind::network_chaos(), None),
            "chaos-mesh.org/v1alpha1/NetworkChaos/"
        );
    }
}

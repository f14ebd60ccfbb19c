use crate::labels::{PAUSE_ANNOTATION, TEST_INSTANCE_LABEL};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

pub const NETWORK_CHAOS_API_VERSION: &str = "chaos-mesh.org/v1alpha1";
pub const NETWORK_CHAOS_KIND: &str = "NetworkChaos";

/// A Chaos Mesh `NetworkChaos` experiment, the fault-injection resource
/// activated by the controller.
///
/// Only the fields the controller reads are typed. Everything else in the
/// spec is carried through `extra` so an object survives a read/write cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkChaos {
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_kind")]
    pub kind: String,
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: NetworkChaosSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkChaosSpec {
    #[serde(default)]
    pub selector: PodSelectorSpec,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodSelectorSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_selectors: Option<BTreeMap<String, String>>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

fn default_api_version() -> String {
    NETWORK_CHAOS_API_VERSION.to_string()
}

fn default_kind() -> String {
    NETWORK_CHAOS_KIND.to_string()
}

impl Default for NetworkChaos {
    fn default() -> Self {
        Self {
            api_version: default_api_version(),
            kind: default_kind(),
            metadata: ObjectMeta::default(),
            spec: NetworkChaosSpec::default(),
            status: None,
        }
    }
}

impl NetworkChaos {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        let mut chaos = Self::default();
        chaos.metadata.namespace = Some(namespace.into());
        chaos.metadata.name = Some(name.into());
        chaos
    }

    /// Add a label selector entry
    pub fn with_selector(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.spec
            .selector
            .label_selectors
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// Mark the experiment paused
    pub fn paused(mut self) -> Self {
        self.metadata
            .annotations
            .get_or_insert_with(BTreeMap::new)
            .insert(PAUSE_ANNOTATION.to_string(), "true".to_string());
        self
    }

    /// Presence of the pause annotation means paused, whatever its value
    pub fn is_paused(&self) -> bool {
        self.metadata
            .annotations
            .as_ref()
            .is_some_and(|a| a.contains_key(PAUSE_ANNOTATION))
    }

    pub fn selector_value(&self, key: &str) -> Option<&str> {
        self.spec
            .selector
            .label_selectors
            .as_ref()
            .and_then(|s| s.get(key))
            .map(String::as_str)
    }

    /// The `testInstance` this experiment targets, if any
    pub fn test_instance(&self) -> Option<&str> {
        self.selector_value(TEST_INSTANCE_LABEL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paused_is_presence_of_annotation() {
        let chaos = NetworkChaos::new("ns", "f1");
        assert!(!chaos.is_paused());

        let mut chaos = chaos.paused();
        assert!(chaos.is_paused());

        chaos
            .metadata
            .annotations
            .as_mut()
            .unwrap()
            .insert(PAUSE_ANNOTATION.to_string(), "false".to_string());
        assert!(chaos.is_paused());
    }

    #[test]
    fn test_unknown_spec_fields_survive() {
        let raw = serde_json::json!({
            "apiVersion": "chaos-mesh.org/v1alpha1",
            "kind": "NetworkChaos",
            "metadata": {"name": "delay", "namespace": "stress"},
            "spec": {
                "action": "delay",
                "mode": "all",
                "delay": {"latency": "100ms"},
                "selector": {
                    "namespaces": ["stress"],
                    "labelSelectors": {"testInstance": "t1"}
                }
            }
        });

        let chaos: NetworkChaos = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(chaos.test_instance(), Some("t1"));
        assert_eq!(chaos.spec.extra["action"], "delay");

        let back = serde_json::to_value(&chaos).unwrap();
        assert_eq!(back["spec"]["delay"]["latency"], "100ms");
        assert_eq!(back["spec"]["selector"]["namespaces"][0], "stress");
    }
}

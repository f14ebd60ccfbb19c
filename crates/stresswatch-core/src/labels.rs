//! Label and annotation keys shared with the test-setup tooling that
//! provisions Pods and fault resources, plus annotation patches.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Pod label marking the Pod as chaos-eligible when set to `"true"`
pub const CHAOS_LABEL: &str = "chaos";

/// Correlation key between a Pod label and a fault resource selector
pub const TEST_INSTANCE_LABEL: &str = "testInstance";

/// Pod annotation set to `"true"` once activation has been committed
pub const CHAOS_STARTED_ANNOTATION: &str = "stress/chaos.started";

/// Fault resource annotation whose presence keeps the experiment paused
pub const PAUSE_ANNOTATION: &str = "experiment.chaos-mesh.org/pause";

/// A set of annotation mutations with JSON merge-patch semantics:
/// `Some(value)` sets the key, `None` removes it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AnnotationPatch {
    changes: BTreeMap<String, Option<String>>,
}

impl AnnotationPatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `key` to `value`
    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.changes.insert(key.into(), Some(value.into()));
        self
    }

    /// Remove `key`
    pub fn remove(mut self, key: impl Into<String>) -> Self {
        self.changes.insert(key.into(), None);
        self
    }

    /// Patch that records the idempotency marker on a Pod
    pub fn mark_chaos_started() -> Self {
        Self::new().set(CHAOS_STARTED_ANNOTATION, "true")
    }

    /// Patch that activates a paused fault resource
    pub fn clear_pause() -> Self {
        Self::new().remove(PAUSE_ANNOTATION)
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn changes(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.changes
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_deref()))
    }

    /// Apply the mutations to object metadata in place
    pub fn apply_to(&self, metadata: &mut ObjectMeta) {
        let annotations = metadata.annotations.get_or_insert_with(BTreeMap::new);
        for (key, value) in &self.changes {
            match value {
                Some(v) => {
                    annotations.insert(key.clone(), v.clone());
                }
                None => {
                    annotations.remove(key);
                }
            }
        }
        if annotations.is_empty() {
            metadata.annotations = None;
        }
    }

    /// Render as a JSON merge patch conditioned on `resource_version`
    pub fn to_merge_patch(&self, resource_version: &str) -> Value {
        let annotations: Map<String, Value> = self
            .changes
            .iter()
            .map(|(k, v)| {
                let value = match v {
                    Some(v) => Value::String(v.clone()),
                    None => Value::Null,
                };
                (k.clone(), value)
            })
            .collect();

        serde_json::json!({
            "metadata": {
                "resourceVersion": resource_version,
                "annotations": annotations,
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_sets_and_removes() {
        let mut meta = ObjectMeta::default();
        meta.annotations = Some(BTreeMap::from([
            (PAUSE_ANNOTATION.to_string(), "true".to_string()),
            ("owner".to_string(), "stress".to_string()),
        ]));

        AnnotationPatch::clear_pause().apply_to(&mut meta);
        let annotations = meta.annotations.as_ref().unwrap();
        assert!(!annotations.contains_key(PAUSE_ANNOTATION));
        assert_eq!(annotations.get("owner").map(String::as_str), Some("stress"));

        AnnotationPatch::mark_chaos_started().apply_to(&mut meta);
        assert_eq!(
            meta.annotations.unwrap().get(CHAOS_STARTED_ANNOTATION).map(String::as_str),
            Some("true")
        );
    }

    #[test]
    fn test_removing_last_annotation_clears_map() {
        let mut meta = ObjectMeta::default();
        meta.annotations = Some(BTreeMap::from([(
            PAUSE_ANNOTATION.to_string(),
            String::new(),
        )]));

        AnnotationPatch::clear_pause().apply_to(&mut meta);
        assert!(meta.annotations.is_none());
    }

    #[test]
    fn test_merge_patch_body() {
        let body = AnnotationPatch::clear_pause().to_merge_patch("42");
        assert_eq!(body["metadata"]["resourceVersion"], "42");
        assert!(body["metadata"]["annotations"][PAUSE_ANNOTATION].is_null());

        let body = AnnotationPatch::mark_chaos_started().to_merge_patch("7");
        assert_eq!(body["metadata"]["annotations"][CHAOS_STARTED_ANNOTATION], "true");
    }
}

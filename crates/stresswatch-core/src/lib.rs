//! Stresswatch Core - Fundamental types for the stress-cluster chaos controller
//!
//! This crate provides:
//! - Resource identity types (GVK, keys, versions)
//! - The `NetworkChaos` fault resource and Pod helpers
//! - Well-known labels, annotations and annotation patches
//! - Error types with miette diagnostics
//! - Serialization helpers

pub mod error;
pub mod events;
pub mod labels;
pub mod resources;
pub mod types;

// Re-export commonly used types
pub use error::{Result, StressWatchError};
pub use events::{ResourceEvent, WatchEventType};
pub use labels::{
    AnnotationPatch, CHAOS_LABEL, CHAOS_STARTED_ANNOTATION, PAUSE_ANNOTATION, TEST_INSTANCE_LABEL,
};
pub use resources::{is_valid_name, NetworkChaos, PodPhase, Resource, ResourceError};
pub use types::{GroupVersionKind, ResourceKey, ResourceVersion};

use serde::Deserialize;

// Re-export k8s-openapi types for convenience
pub use k8s_openapi;
pub use k8s_openapi::api::core::v1::Pod;
pub use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

/// Deserialize a resource from YAML
pub fn from_yaml<T: for<'de> serde::Deserialize<'de>>(data: &str) -> Result<T> {
    serde_yaml::from_str(data).map_err(|e| {
        StressWatchError::serialization_error(
            format!("Failed to deserialize from YAML: {}", e),
            Some(Box::new(e)),
        )
    })
}

/// Split a multi-document YAML manifest into JSON values, skipping empty documents
pub fn yaml_documents(data: &str) -> Result<Vec<serde_json::Value>> {
    let mut docs = Vec::new();
    for doc in serde_yaml::Deserializer::from_str(data) {
        let value = serde_json::Value::deserialize(doc).map_err(|e| {
            StressWatchError::serialization_error(
                format!("Failed to parse YAML document: {}", e),
                Some(Box::new(e)),
            )
        })?;
        if !value.is_null() {
            docs.push(value);
        }
    }
    Ok(docs)
}

use k8s_openapi::api::core::v1::Pod;
use stresswatch_core::resources::pod_annotation;
use stresswatch_core::CHAOS_STARTED_ANNOTATION;

/// Whether activation has already been committed for a Pod
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActivationState {
    /// Marker absent or `"false"`
    NotStarted,
    /// Marker is `"true"`; nothing more to do for this Pod
    Started,
    /// Marker present with an unparsable value
    Invalid(String),
}

impl ActivationState {
    /// Parse the marker annotation value
    pub fn from_marker(value: Option<&str>) -> Self {
        match value {
            None | Some("false") => ActivationState::NotStarted,
            Some("true") => ActivationState::Started,
            Some(other) => ActivationState::Invalid(other.to_string()),
        }
    }

    /// Read the marker from a Pod's annotations
    pub fn of(pod: &Pod) -> Self {
        Self::from_marker(pod_annotation(pod, CHAOS_STARTED_ANNOTATION))
    }

    /// Only `Started` suppresses activation. `Invalid` re-attempts it, which
    /// is harmless because activating an unpaused resource is a no-op.
    pub fn is_started(&self) -> bool {
        matches!(self, ActivationState::Started)
    }
}

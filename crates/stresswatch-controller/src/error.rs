// Allow unused assignments for diagnostic fields - they're used by the macros
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

/// Controller error type for reconciliation and object store operations
#[derive(Error, Debug, Diagnostic)]
pub enum ControllerError {
    /// Conditional write rejected because the object changed since it was read
    #[error("Conflict writing {resource_key}: version {expected_version} is stale")]
    #[diagnostic(
        code(stresswatch::controller::conflict),
        help("Another writer modified the object. Re-read it and retry with the latest resourceVersion")
    )]
    Conflict {
        #[allow(unused)]
        resource_key: String,
        #[allow(unused)]
        expected_version: String,
    },

    /// Object does not exist (or was deleted concurrently)
    #[error("Object not found: {resource_key}")]
    #[diagnostic(
        code(stresswatch::controller::not_found),
        help("The object may have been deleted while the reconciliation was in progress")
    )]
    NotFound {
        #[allow(unused)]
        resource_key: String,
    },

    /// A chaos-eligible Pod lacks its `testInstance` label
    #[error("Chaos enabled pod {pod_key} is missing the {label} label")]
    #[diagnostic(
        code(stresswatch::controller::missing_test_instance),
        help("Add `{label}: <id>` to the pod labels, matching the labelSelectors of its NetworkChaos. Retrying cannot fix this")
    )]
    MissingTestInstance {
        #[allow(unused)]
        pod_key: String,
        #[allow(unused)]
        label: String,
    },

    /// Some fault resources could not be activated; the Pod was not marked
    #[error("Activation incomplete for pod {pod_key}: {failed_count} of {total} fault resources failed ({failed})")]
    #[diagnostic(
        code(stresswatch::controller::activation_incomplete),
        help("The pod stays eligible and is re-evaluated on the next reconciliation. Already activated resources are skipped")
    )]
    ActivationIncomplete {
        #[allow(unused)]
        pod_key: String,
        #[allow(unused)]
        failed: String,
        #[allow(unused)]
        failed_count: usize,
        #[allow(unused)]
        total: usize,
    },

    /// The reconciliation deadline elapsed
    #[error("Reconciliation of {pod_key} exceeded its deadline")]
    #[diagnostic(
        code(stresswatch::controller::deadline_exceeded),
        help("The object store may be slow or unreachable. The pod is requeued with backoff")
    )]
    DeadlineExceeded {
        #[allow(unused)]
        pod_key: String,
    },

    /// The controller is shutting down
    #[error("Reconciliation cancelled")]
    #[diagnostic(code(stresswatch::controller::cancelled))]
    Cancelled,

    /// Request to the API server failed
    #[error("API request failed: {message}")]
    #[diagnostic(
        code(stresswatch::controller::api_request_failed),
        help("Check connectivity to the API server and the controller's credentials")
    )]
    ApiRequestFailed {
        #[allow(unused)]
        message: String,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {message}")]
    #[diagnostic(code(stresswatch::controller::invalid_config), help("{suggestion}"))]
    InvalidConfig {
        #[allow(unused)]
        message: String,
        #[allow(unused)]
        suggestion: String,
    },

    /// Core library error
    #[error(transparent)]
    #[diagnostic(transparent)]
    Core(#[from] stresswatch_core::StressWatchError),

    /// Storage error
    #[error(transparent)]
    #[diagnostic(transparent)]
    Storage(#[from] stresswatch_storage::StorageError),

    /// Internal error
    #[error("Internal controller error: {message}")]
    #[diagnostic(
        code(stresswatch::controller::internal_error),
        help("This is likely a bug in stresswatch-controller. Please report it with the full error details")
    )]
    InternalError {
        #[allow(unused)]
        message: String,
    },
}

/// Result type alias for controller operations
pub type Result<T> = std::result::Result<T, ControllerError>;

impl ControllerError {
    pub fn conflict(resource_key: impl ToString, expected_version: impl ToString) -> Self {
        Self::Conflict {
            resource_key: resource_key.to_string(),
            expected_version: expected_version.to_string(),
        }
    }

    pub fn not_found(resource_key: impl ToString) -> Self {
        Self::NotFound {
            resource_key: resource_key.to_string(),
        }
    }

    pub fn missing_test_instance(pod_key: impl ToString, label: impl Into<String>) -> Self {
        Self::MissingTestInstance {
            pod_key: pod_key.to_string(),
            label: label.into(),
        }
    }

    pub fn activation_incomplete(pod_key: impl ToString, failed: &[String], total: usize) -> Self {
        Self::ActivationIncomplete {
            pod_key: pod_key.to_string(),
            failed: failed.join(", "),
            failed_count: failed.len(),
            total,
        }
    }

    pub fn deadline_exceeded(pod_key: impl ToString) -> Self {
        Self::DeadlineExceeded {
            pod_key: pod_key.to_string(),
        }
    }

    pub fn api_request_failed(message: impl Into<String>) -> Self {
        Self::ApiRequestFailed {
            message: message.into(),
        }
    }

    pub fn invalid_config(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::InternalError {
            message: message.into(),
        }
    }

    /// Whether a failed store call may succeed if simply repeated after a
    /// short delay (used for the bounded local retry).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Conflict { .. } | Self::NotFound { .. } | Self::ApiRequestFailed { .. }
        )
    }

    /// Whether the dispatch queue should reschedule the work item.
    ///
    /// Only static faults and shutdown are terminal; everything else,
    /// including unexpected internal errors, is retried with backoff.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::MissingTestInstance { .. } | Self::InvalidConfig { .. } | Self::Cancelled
        )
    }
}

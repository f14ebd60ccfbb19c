use crate::decision::Decision;
use crate::error::{ControllerError, Result};
use crate::idempotency::ActivationState;
use crate::retry::{retry_transient, RetryConfig};
use crate::scope::ReconcileScope;
use crate::store::ObjectStore;
use std::sync::Arc;
use stresswatch_core::{AnnotationPatch, Resource, ResourceKey};
use tracing::{debug, error, info};

/// What applying a [`Decision`] changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyReport {
    /// Fault resources this run unpaused
    pub activated: Vec<ResourceKey>,
    /// Targets found already unpaused and left untouched
    pub already_active: Vec<ResourceKey>,
    /// Whether this run wrote the Pod's started marker
    pub pod_marked: bool,
    /// The Pod was deleted before it could be marked
    pub pod_gone: bool,
}

enum TargetOutcome {
    Activated,
    AlreadyActive,
}

enum PodMark {
    Marked,
    AlreadyMarked,
    Gone,
}

/// Executes decisions against the object store with optimistic concurrency.
///
/// Each target is re-read and patched conditionally on the version just
/// read; conflicts are retried a bounded number of times. The Pod is marked
/// only after every target is active, so a partial failure leaves it
/// eligible for the next reconciliation.
pub struct PatchApplier {
    store: Arc<dyn ObjectStore>,
    retry: RetryConfig,
}

impl PatchApplier {
    pub fn new(store: Arc<dyn ObjectStore>, retry: RetryConfig) -> Self {
        Self { store, retry }
    }

    pub async fn apply(&self, decision: &Decision, scope: &ReconcileScope) -> Result<ApplyReport> {
        let mut report = ApplyReport::default();
        let mut failed = Vec::new();

        for target in &decision.targets {
            match self.activate(target, scope).await {
                Ok(TargetOutcome::Activated) => report.activated.push(target.clone()),
                Ok(TargetOutcome::AlreadyActive) => report.already_active.push(target.clone()),
                Err(e @ (ControllerError::Cancelled | ControllerError::DeadlineExceeded { .. })) => {
                    return Err(e)
                }
                Err(e) => {
                    error!("Failed to activate {} for pod {}: {}", target, decision.pod_key, e);
                    failed.push(target.to_string());
                }
            }
        }

        if !failed.is_empty() {
            return Err(ControllerError::activation_incomplete(
                &decision.pod_key,
                &failed,
                decision.targets.len(),
            ));
        }

        if decision.mark_pod {
            match self.mark_pod(&decision.pod_key, scope).await? {
                PodMark::Marked => report.pod_marked = true,
                PodMark::AlreadyMarked => {}
                PodMark::Gone => report.pod_gone = true,
            }
        }

        Ok(report)
    }

    async fn activate(&self, target: &ResourceKey, scope: &ReconcileScope) -> Result<TargetOutcome> {
        let store = self.store.as_ref();

        retry_transient(&self.retry, scope, "activate fault resource", || async move {
            let chaos = store
                .get_fault_resource(&target.namespace, &target.name)
                .await?
                .ok_or_else(|| ControllerError::not_found(target))?;

            if !chaos.is_paused() {
                return Ok(TargetOutcome::AlreadyActive);
            }

            let version = chaos.resource_version().ok_or_else(|| {
                ControllerError::internal_error(format!("{} has no resourceVersion", target))
            })?;
            let new_version = store
                .patch_fault_resource(
                    &target.namespace,
                    &target.name,
                    &AnnotationPatch::clear_pause(),
                    &version,
                )
                .await?;

            info!("Started chaos {} (version {})", target, new_version);
            Ok(TargetOutcome::Activated)
        })
        .await
    }

    async fn mark_pod(&self, pod_key: &ResourceKey, scope: &ReconcileScope) -> Result<PodMark> {
        let store = self.store.as_ref();

        retry_transient(&self.retry, scope, "mark pod chaos started", || async move {
            let Some(pod) = store.get_pod(&pod_key.namespace, &pod_key.name).await? else {
                debug!("Pod {} deleted before it could be marked", pod_key);
                return Ok(PodMark::Gone);
            };

            if ActivationState::of(&pod).is_started() {
                return Ok(PodMark::AlreadyMarked);
            }

            let version = pod.resource_version().ok_or_else(|| {
                ControllerError::internal_error(format!("{} has no resourceVersion", pod_key))
            })?;
            match store
                .patch_pod(
                    &pod_key.namespace,
                    &pod_key.name,
                    &AnnotationPatch::mark_chaos_started(),
                    &version,
                )
                .await
            {
                Ok(_) => {
                    info!("Marked pod {} as chaos started", pod_key);
                    Ok(PodMark::Marked)
                }
                Err(ControllerError::NotFound { .. }) => {
                    debug!("Pod {} deleted before it could be marked", pod_key);
                    Ok(PodMark::Gone)
                }
                Err(e) => Err(e),
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MockObjectStore;
    use k8s_openapi::api::core::v1::Pod;
    use std::time::Duration;
    use stresswatch_core::{NetworkChaos, CHAOS_STARTED_ANNOTATION, TEST_INSTANCE_LABEL};
    use tokio::time::Instant;
    use tokio_util::sync::CancellationToken;

    fn scope() -> ReconcileScope {
        ReconcileScope::new(
            ResourceKey::pod("ns", "p1"),
            Instant::now() + Duration::from_secs(30),
            CancellationToken::new(),
        )
    }

    fn fault(name: &str) -> NetworkChaos {
        NetworkChaos::new("ns", name)
            .with_selector(TEST_INSTANCE_LABEL, "t1")
            .paused()
    }

    fn decision(targets: &[&str]) -> Decision {
        Decision {
            pod_key: ResourceKey::pod("ns", "p1"),
            targets: targets
                .iter()
                .map(|name| ResourceKey::network_chaos("ns", *name))
                .collect(),
            mark_pod: true,
        }
    }

    async fn store_with(faults: &[&str]) -> MockObjectStore {
        let store = MockObjectStore::new();
        let mut pod = Pod::default();
        pod.metadata.namespace = Some("ns".to_string());
        pod.metadata.name = Some("p1".to_string());
        store.insert_pod(pod).await.unwrap();
        for name in faults {
            store.insert_fault_resource(fault(name)).await.unwrap();
        }
        store
    }

    fn applier(store: &MockObjectStore) -> PatchApplier {
        PatchApplier::new(Arc::new(store.clone()), RetryConfig::with_max_attempts(3))
    }

    async fn is_marked(store: &MockObjectStore) -> bool {
        store
            .pod("ns", "p1")
            .await
            .and_then(|p| p.metadata.annotations)
            .is_some_and(|a| a.get(CHAOS_STARTED_ANNOTATION).map(String::as_str) == Some("true"))
    }

    #[tokio::test(start_paused = true)]
    async fn test_activates_and_marks() {
        let store = store_with(&["f1", "f2"]).await;
        let report = applier(&store)
            .apply(&decision(&["f1", "f2"]), &scope())
            .await
            .unwrap();

        assert_eq!(report.activated.len(), 2);
        assert!(report.pod_marked);
        assert!(!store.fault_resource("ns", "f1").await.unwrap().is_paused());
        assert!(!store.fault_resource("ns", "f2").await.unwrap().is_paused());
        assert!(is_marked(&store).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_already_active_target_is_not_patched() {
        let store = store_with(&[]).await;
        store
            .insert_fault_resource(NetworkChaos::new("ns", "f1").with_selector(TEST_INSTANCE_LABEL, "t1"))
            .await
            .unwrap();

        let report = applier(&store).apply(&decision(&["f1"]), &scope()).await.unwrap();
        assert_eq!(report.already_active, vec![ResourceKey::network_chaos("ns", "f1")]);
        assert!(store
            .patch_calls_for(&ResourceKey::network_chaos("ns", "f1"))
            .await
            .is_empty());
        assert!(report.pod_marked);
    }

    #[tokio::test(start_paused = true)]
    async fn test_conflict_is_retried_within_bound() {
        let store = store_with(&["f1"]).await;
        let key = ResourceKey::network_chaos("ns", "f1");
        store.inject_conflicts(key.clone(), 2).await;

        let report = applier(&store).apply(&decision(&["f1"]), &scope()).await.unwrap();
        assert_eq!(report.activated, vec![key.clone()]);
        assert_eq!(store.patch_calls_for(&key).await.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_failure_leaves_pod_unmarked() {
        let store = store_with(&["f1", "f2"]).await;
        let f2 = ResourceKey::network_chaos("ns", "f2");
        store.inject_conflicts(f2.clone(), 3).await;

        let err = applier(&store)
            .apply(&decision(&["f1", "f2"]), &scope())
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::ActivationIncomplete { failed_count: 1, total: 2, .. }));
        assert!(err.is_retryable());

        assert!(!store.fault_resource("ns", "f1").await.unwrap().is_paused());
        assert!(store.fault_resource("ns", "f2").await.unwrap().is_paused());
        assert!(!is_marked(&store).await);
        assert!(store
            .patch_calls_for(&ResourceKey::pod("ns", "p1"))
            .await
            .is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_pod_mark_conflict_is_retried() {
        let store = store_with(&["f1"]).await;
        let pod_key = ResourceKey::pod("ns", "p1");
        store.inject_conflicts(pod_key.clone(), 1).await;

        let report = applier(&store).apply(&decision(&["f1"]), &scope()).await.unwrap();
        assert!(report.pod_marked);
        assert!(is_marked(&store).await);
        assert_eq!(store.patch_calls_for(&pod_key).await.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_vanished_target_is_retryable_failure() {
        let store = store_with(&["f1"]).await;
        let err = applier(&store)
            .apply(&decision(&["f1", "gone"]), &scope())
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::ActivationIncomplete { .. }));
        assert!(err.is_retryable());
        assert!(!is_marked(&store).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_aborts_remaining_targets() {
        let store = store_with(&["f1", "f2"]).await;
        let cancel = CancellationToken::new();
        cancel.cancel();
        let scope = ReconcileScope::new(
            ResourceKey::pod("ns", "p1"),
            Instant::now() + Duration::from_secs(30),
            cancel,
        );

        let err = applier(&store)
            .apply(&decision(&["f1", "f2"]), &scope)
            .await
            .unwrap_err();
        assert!(matches!(err, ControllerError::Cancelled));
        assert!(store.patch_calls().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deleted_pod_is_not_an_error() {
        let store = MockObjectStore::new();
        store.insert_fault_resource(fault("f1")).await.unwrap();

        let report = applier(&store).apply(&decision(&["f1"]), &scope()).await.unwrap();
        assert_eq!(report.activated, vec![ResourceKey::network_chaos("ns", "f1")]);
        assert!(report.pod_gone);
        assert!(!report.pod_marked);
        assert!(store
            .patch_calls_for(&ResourceKey::pod("ns", "p1"))
            .await
            .is_empty());
    }
}

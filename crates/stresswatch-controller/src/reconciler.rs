use crate::applier::{ApplyReport, PatchApplier};
use crate::config::ControllerConfig;
use crate::decision::{screen, select_targets, Screening, SkipReason, Verdict};
use crate::error::Result;
use crate::scope::ReconcileScope;
use crate::store::ObjectStore;
use std::sync::Arc;
use stresswatch_core::ResourceKey;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Result of a successful reconciliation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Activated(ApplyReport),
    Skipped(SkipReason),
}

/// One reconciliation of one Pod: read a snapshot, decide, apply.
///
/// The caller decides whether to requeue from the error:
/// [`crate::ControllerError::is_retryable`].
pub struct Reconciler {
    store: Arc<dyn ObjectStore>,
    applier: PatchApplier,
    excluded_namespaces: Vec<String>,
}

impl Reconciler {
    pub fn new(store: Arc<dyn ObjectStore>, config: &ControllerConfig) -> Self {
        Self {
            applier: PatchApplier::new(store.clone(), config.retry_config()),
            store,
            excluded_namespaces: config.excluded_namespaces.clone(),
        }
    }

    pub async fn reconcile(
        &self,
        pod_key: &ResourceKey,
        deadline: Instant,
        cancel: &CancellationToken,
    ) -> Result<Action> {
        if self.excluded_namespaces.contains(&pod_key.namespace) {
            return Ok(Action::Skipped(SkipReason::ExcludedNamespace(
                pod_key.namespace.clone(),
            )));
        }

        let scope = ReconcileScope::new(pod_key.clone(), deadline, cancel.clone());

        let Some(pod) = scope
            .run(self.store.get_pod(&pod_key.namespace, &pod_key.name))
            .await?
        else {
            debug!("Pod {} not found, nothing to do", pod_key);
            return Ok(Action::Skipped(SkipReason::PodNotFound));
        };

        // Avoid listing fault resources for Pods that can never need them
        let (pod_key, test_instance) = match screen(&pod, &self.excluded_namespaces)? {
            Screening::Skip(reason) => {
                debug!("Ignoring pod {}: {}", pod_key, reason);
                return Ok(Action::Skipped(reason));
            }
            Screening::Eligible {
                pod_key,
                test_instance,
            } => (pod_key, test_instance),
        };

        let candidates = scope
            .run(self.store.list_fault_resources(&pod_key.namespace))
            .await?;

        match select_targets(pod_key, test_instance, &candidates) {
            Verdict::Skip(reason) => {
                debug!("Ignoring pod {}: {}", scope.pod_key(), reason);
                Ok(Action::Skipped(reason))
            }
            Verdict::Activate(decision) => {
                info!(
                    "Enabling chaos for pod {} ({} fault resources)",
                    decision.pod_key,
                    decision.targets.len()
                );
                let report = self.applier.apply(&decision, &scope).await?;
                if report.pod_gone {
                    info!(
                        "Pod {} was deleted during activation ({} fault resources activated)",
                        decision.pod_key,
                        report.activated.len()
                    );
                    return Ok(Action::Skipped(SkipReason::PodNotFound));
                }
                Ok(Action::Activated(report))
            }
        }
    }
}

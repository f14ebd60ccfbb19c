use crate::error::{ControllerError, Result};
use std::future::Future;
use std::time::Duration;
use stresswatch_core::ResourceKey;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Deadline and cancellation for one reconciliation.
///
/// Every store call and backoff sleep is awaited through [`ReconcileScope::run`],
/// so an expired deadline or a shutdown is observed at the next I/O boundary.
#[derive(Debug, Clone)]
pub struct ReconcileScope {
    pod_key: ResourceKey,
    deadline: Instant,
    cancel: CancellationToken,
}

impl ReconcileScope {
    pub fn new(pod_key: ResourceKey, deadline: Instant, cancel: CancellationToken) -> Self {
        Self {
            pod_key,
            deadline,
            cancel,
        }
    }

    pub fn pod_key(&self) -> &ResourceKey {
        &self.pod_key
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Await `fut`, giving up on cancellation or when the deadline passes
    pub async fn run<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ControllerError::Cancelled),
            _ = tokio::time::sleep_until(self.deadline) => {
                Err(ControllerError::deadline_exceeded(&self.pod_key))
            }
            result = fut => result,
        }
    }

    /// Sleep for `delay` under the same deadline and cancellation rules
    pub async fn sleep(&self, delay: Duration) -> Result<()> {
        self.run(async {
            tokio::time::sleep(delay).await;
            Ok(())
        })
        .await
    }
}

//! Bounded retry with exponential backoff for conditional store writes.
//!
//! Only transient failures (conflicts, races with deletion, API transport
//! errors) are retried. Every attempt and every sleep runs under the
//! reconciliation's [`ReconcileScope`], so a deadline or shutdown stops the
//! loop at the next boundary.

use crate::error::Result;
use crate::scope::ReconcileScope;
use std::future::Future;
use std::time::Duration;
use tracing::{error, warn};

/// Configuration for the bounded local retry
#[derive(Clone, Debug, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,
    /// Delay after the first failure
    pub initial_delay: Duration,
    /// Upper bound on any single delay
    pub max_delay: Duration,
    /// Multiplier applied to the delay after each failure
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    pub fn with_max_attempts(attempts: u32) -> Self {
        Self {
            max_attempts: attempts,
            ..Default::default()
        }
    }

    /// Delay to wait after failed attempt number `attempt` (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let delay = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }
}

/// Run `operation` until it succeeds, fails with a non-transient error, or
/// `max_attempts` is exhausted. The last error is returned on exhaustion.
pub async fn retry_transient<F, Fut, T>(
    config: &RetryConfig,
    scope: &ReconcileScope,
    operation_name: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        match scope.run(operation()).await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_transient() => return Err(e),
            Err(e) if attempt >= max_attempts => {
                error!(
                    operation = %operation_name,
                    attempt,
                    error = %e,
                    "Operation failed after max retries"
                );
                return Err(e);
            }
            Err(e) => {
                let delay = config.delay_after(attempt);
                warn!(
                    operation = %operation_name,
                    attempt,
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "Operation failed, retrying"
                );
                scope.sleep(delay).await?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ControllerError;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use stresswatch_core::ResourceKey;
    use tokio::time::Instant;
    use tokio_util::sync::CancellationToken;

    fn scope() -> ReconcileScope {
        ReconcileScope::new(
            ResourceKey::pod("ns", "p1"),
            Instant::now() + Duration::from_secs(30),
            CancellationToken::new(),
        )
    }

    #[test]
    fn test_delay_is_exponential_and_capped() {
        let config = RetryConfig {
            max_attempts: 10,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(300),
            backoff_multiplier: 2.0,
        };
        assert_eq!(config.delay_after(1), Duration::from_millis(50));
        assert_eq!(config.delay_after(2), Duration::from_millis(100));
        assert_eq!(config.delay_after(3), Duration::from_millis(200));
        assert_eq!(config.delay_after(4), Duration::from_millis(300));
        assert_eq!(config.delay_after(40), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_conflicts() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let result = retry_transient(&RetryConfig::default(), &scope(), "patch", || {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ControllerError::conflict("NetworkChaos/ns/f1", "1"))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_max_attempts() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let result: Result<()> = retry_transient(&RetryConfig::default(), &scope(), "patch", || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(ControllerError::conflict("NetworkChaos/ns/f1", "1"))
            }
        })
        .await;

        assert!(matches!(result, Err(ControllerError::Conflict { .. })));
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_transient_error_is_not_retried() {
        let count = Arc::new(AtomicU32::new(0));
        let c = count.clone();

        let result: Result<()> = retry_transient(&RetryConfig::default(), &scope(), "patch", || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(ControllerError::internal_error("bad state"))
            }
        })
        .await;

        assert!(matches!(result, Err(ControllerError::InternalError { .. })));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}

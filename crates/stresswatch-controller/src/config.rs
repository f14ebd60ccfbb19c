use crate::error::{ControllerError, Result};
use crate::retry::RetryConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Controller configuration, loadable from YAML. Every field has a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ControllerConfig {
    /// Namespaces whose Pods are never considered
    pub excluded_namespaces: Vec<String>,
    /// Number of concurrent reconcile workers
    pub workers: usize,
    /// Interval between full Pod list resyncs
    pub resync_interval_secs: u64,
    /// Deadline for a single reconciliation
    pub reconcile_timeout_secs: u64,
    /// Bounded retry for conditional patches
    pub patch_retry: PatchRetrySettings,
    /// Per-Pod backoff when a reconciliation is requeued
    pub requeue_backoff: RequeueBackoffSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PatchRetrySettings {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RequeueBackoffSettings {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            excluded_namespaces: vec!["kube-system".to_string(), "stress-infra".to_string()],
            workers: 4,
            resync_interval_secs: 30,
            reconcile_timeout_secs: 30,
            patch_retry: PatchRetrySettings::default(),
            requeue_backoff: RequeueBackoffSettings::default(),
        }
    }
}

impl Default for PatchRetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 50,
            max_delay_ms: 1000,
            backoff_multiplier: 2.0,
        }
    }
}

impl Default for RequeueBackoffSettings {
    fn default() -> Self {
        Self {
            base_delay_ms: 100,
            max_delay_ms: 60_000,
        }
    }
}

impl ControllerConfig {
    /// Parse a YAML document and validate it
    pub fn from_yaml_str(data: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(data).map_err(|e| {
            ControllerError::invalid_config(
                format!("failed to parse controller config: {}", e),
                "Check the YAML syntax and field names against the documented configuration keys",
            )
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a YAML config file
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            ControllerError::invalid_config(
                format!("failed to read {}: {}", path.display(), e),
                "Ensure the --config path exists and is readable",
            )
        })?;
        Self::from_yaml_str(&data)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(ControllerError::invalid_config(
                "workers must be at least 1",
                "Set workers to a positive number (default 4)",
            ));
        }
        if self.patch_retry.max_attempts == 0 {
            return Err(ControllerError::invalid_config(
                "patch_retry.max_attempts must be at least 1",
                "Set patch_retry.max_attempts to a small positive bound such as 3",
            ));
        }
        if self.patch_retry.backoff_multiplier < 1.0 {
            return Err(ControllerError::invalid_config(
                "patch_retry.backoff_multiplier must be >= 1.0",
                "Use 1.0 for a constant delay or 2.0 for doubling",
            ));
        }
        if self.resync_interval_secs == 0 || self.reconcile_timeout_secs == 0 {
            return Err(ControllerError::invalid_config(
                "resync_interval_secs and reconcile_timeout_secs must be non-zero",
                "Use values of a few seconds or more",
            ));
        }
        if self.requeue_backoff.base_delay_ms == 0
            || self.requeue_backoff.max_delay_ms < self.requeue_backoff.base_delay_ms
        {
            return Err(ControllerError::invalid_config(
                "requeue_backoff needs 0 < base_delay_ms <= max_delay_ms",
                "The defaults are base_delay_ms: 100 and max_delay_ms: 60000",
            ));
        }
        Ok(())
    }

    pub fn is_excluded(&self, namespace: &str) -> bool {
        self.excluded_namespaces.iter().any(|ns| ns == namespace)
    }

    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs)
    }

    pub fn reconcile_timeout(&self) -> Duration {
        Duration::from_secs(self.reconcile_timeout_secs)
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.patch_retry.max_attempts,
            initial_delay: Duration::from_millis(self.patch_retry.initial_delay_ms),
            max_delay: Duration::from_millis(self.patch_retry.max_delay_ms),
            backoff_multiplier: self.patch_retry.backoff_multiplier,
        }
    }

    pub fn requeue_base_delay(&self) -> Duration {
        Duration::from_millis(self.requeue_backoff.base_delay_ms)
    }

    pub fn requeue_max_delay(&self) -> Duration {
        Duration::from_millis(self.requeue_backoff.max_delay_ms)
    }
}

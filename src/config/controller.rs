//! # Controller Configuration
//!
//! Operator-level settings loaded from environment variables.

use crate::constants::{
    DEFAULT_CONFLICT_RETRY_BASE_MS, DEFAULT_CONFLICT_RETRY_FACTOR, DEFAULT_CONFLICT_RETRY_STEPS,
    DEFAULT_ERROR_BACKOFF_MAX_SECS, DEFAULT_ERROR_BACKOFF_MIN_SECS, DEFAULT_METRICS_PORT,
    DEFAULT_NAMESPACE, DEFAULT_OPERATOR_NAME, DEFAULT_REGISTRY_IMAGE, DEFAULT_RESYNC_INTERVAL_SECS,
    DEFAULT_STORAGE_REMOVAL_INTERVAL_SECS, DEFAULT_STORAGE_REMOVAL_TIMEOUT_SECS,
};
use std::time::Duration;

/// Operator-level configuration
///
/// Every setting has a default and can be overridden via environment variables
/// set on the operator deployment.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Namespace holding the operator and every namespaced registry object
    pub namespace: String,
    /// Name of the ClusterOperator this operator reports to
    pub operator_name: String,
    /// Registry image used when the Config leaves `image` empty
    pub registry_image: String,
    /// Port of the metrics/probe HTTP server
    pub metrics_port: u16,
    /// Requeue interval after a successful pass (seconds)
    pub resync_interval_secs: u64,
    /// Maximum attempts for one mutator when the API server reports a conflict
    pub conflict_retry_steps: u32,
    /// First conflict retry delay (milliseconds)
    pub conflict_retry_base_ms: u64,
    /// Conflict retry delay multiplier
    pub conflict_retry_factor: u32,
    /// Poll interval of the storage teardown loop (seconds)
    pub storage_removal_interval_secs: u64,
    /// Deadline of the storage teardown loop (seconds)
    pub storage_removal_timeout_secs: u64,
    /// Smallest requeue delay after a failed pass (seconds)
    pub error_backoff_min_secs: u64,
    /// Largest requeue delay after a failed pass (seconds)
    pub error_backoff_max_secs: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            operator_name: DEFAULT_OPERATOR_NAME.to_string(),
            registry_image: DEFAULT_REGISTRY_IMAGE.to_string(),
            metrics_port: DEFAULT_METRICS_PORT,
            resync_interval_secs: DEFAULT_RESYNC_INTERVAL_SECS,
            conflict_retry_steps: DEFAULT_CONFLICT_RETRY_STEPS,
            conflict_retry_base_ms: DEFAULT_CONFLICT_RETRY_BASE_MS,
            conflict_retry_factor: DEFAULT_CONFLICT_RETRY_FACTOR,
            storage_removal_interval_secs: DEFAULT_STORAGE_REMOVAL_INTERVAL_SECS,
            storage_removal_timeout_secs: DEFAULT_STORAGE_REMOVAL_TIMEOUT_SECS,
            error_backoff_min_secs: DEFAULT_ERROR_BACKOFF_MIN_SECS,
            error_backoff_max_secs: DEFAULT_ERROR_BACKOFF_MAX_SECS,
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables, falling back to defaults
    #[must_use]
    pub fn from_env() -> Self {
        let namespace = std::env::var("WATCH_NAMESPACE")
            .or_else(|_| std::env::var("POD_NAMESPACE"))
            .unwrap_or_else(|_| DEFAULT_NAMESPACE.to_string());

        Self {
            namespace,
            operator_name: env_var_or_default_str("OPERATOR_NAME", DEFAULT_OPERATOR_NAME),
            registry_image: env_var_or_default_str("IMAGE", DEFAULT_REGISTRY_IMAGE),
            metrics_port: env_var_or_default("METRICS_PORT", DEFAULT_METRICS_PORT),
            resync_interval_secs: env_var_or_default(
                "RESYNC_INTERVAL_SECS",
                DEFAULT_RESYNC_INTERVAL_SECS,
            ),
            conflict_retry_steps: env_var_or_default(
                "CONFLICT_RETRY_STEPS",
                DEFAULT_CONFLICT_RETRY_STEPS,
            ),
            conflict_retry_base_ms: env_var_or_default(
                "CONFLICT_RETRY_BASE_MS",
                DEFAULT_CONFLICT_RETRY_BASE_MS,
            ),
            conflict_retry_factor: env_var_or_default(
                "CONFLICT_RETRY_FACTOR",
                DEFAULT_CONFLICT_RETRY_FACTOR,
            ),
            storage_removal_interval_secs: env_var_or_default(
                "STORAGE_REMOVAL_INTERVAL_SECS",
                DEFAULT_STORAGE_REMOVAL_INTERVAL_SECS,
            ),
            storage_removal_timeout_secs: env_var_or_default(
                "STORAGE_REMOVAL_TIMEOUT_SECS",
                DEFAULT_STORAGE_REMOVAL_TIMEOUT_SECS,
            ),
            error_backoff_min_secs: env_var_or_default(
                "ERROR_BACKOFF_MIN_SECS",
                DEFAULT_ERROR_BACKOFF_MIN_SECS,
            ),
            error_backoff_max_secs: env_var_or_default(
                "ERROR_BACKOFF_MAX_SECS",
                DEFAULT_ERROR_BACKOFF_MAX_SECS,
            ),
        }
    }

    #[must_use]
    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs)
    }

    #[must_use]
    pub fn storage_removal_interval(&self) -> Duration {
        Duration::from_secs(self.storage_removal_interval_secs)
    }

    #[must_use]
    pub fn storage_removal_timeout(&self) -> Duration {
        Duration::from_secs(self.storage_removal_timeout_secs)
    }
}

/// Read environment variable or return default value
fn env_var_or_default<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Read environment variable as string or return default
fn env_var_or_default_str(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_conflict_backoff() {
        let config = ControllerConfig::default();
        assert_eq!(config.conflict_retry_steps, 4);
        assert_eq!(config.conflict_retry_base_ms, 10);
        assert_eq!(config.conflict_retry_factor, 5);
    }

    #[test]
    fn test_storage_removal_durations() {
        let config = ControllerConfig::default();
        assert_eq!(config.storage_removal_interval(), Duration::from_secs(1));
        assert_eq!(config.storage_removal_timeout(), Duration::from_secs(300));
    }

    #[test]
    fn test_env_var_or_default_falls_back_on_garbage() {
        // Key is unique to this test so parallel tests do not race on it
        let value: u16 = env_var_or_default("IMAGE_REGISTRY_OPERATOR_TEST_UNSET_PORT", 42);
        assert_eq!(value, 42);
    }
}

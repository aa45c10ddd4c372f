//! # Controller Configuration
//!
//! Controller-level settings loaded from environment variables.

use std::time::Duration;

/// Controller-level configuration
///
/// All settings have sensible defaults and can be overridden via environment variables.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Requeue delay after an output Secret is deleted externally (seconds)
    pub recreate_delay_secs: u64,
    /// Requeue delay after an output Secret is modified externally (seconds)
    pub sync_changed_delay_secs: u64,
    /// Floor for syncInterval-driven requeues (seconds)
    pub min_requeue_secs: u64,
    /// Reconciliation error backoff floor (seconds)
    pub backoff_min_secs: u64,
    /// Reconciliation error backoff ceiling (seconds)
    pub backoff_max_secs: u64,
    /// Delay before restarting the watch stream after it ends (seconds)
    pub watch_restart_delay_secs: u64,
    /// Maximum concurrent reconciliations
    pub max_concurrent_reconciliations: u16,
    /// HTTP port for metrics and probes
    pub metrics_port: u16,
    /// Namespace the operator runs in
    pub operator_namespace: String,
    /// Pod name, used as the leader election identity
    pub pod_name: Option<String>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        use crate::constants::*;
        Self {
            recreate_delay_secs: DEFAULT_RECREATE_DELAY_SECS,
            sync_changed_delay_secs: DEFAULT_SYNC_CHANGED_DELAY_SECS,
            min_requeue_secs: MIN_REQUEUE_SECS,
            backoff_min_secs: DEFAULT_BACKOFF_MIN_SECS,
            backoff_max_secs: DEFAULT_BACKOFF_MAX_SECS,
            watch_restart_delay_secs: DEFAULT_WATCH_RESTART_DELAY_SECS,
            max_concurrent_reconciliations: DEFAULT_MAX_CONCURRENT_RECONCILIATIONS,
            metrics_port: DEFAULT_METRICS_PORT,
            operator_namespace: DEFAULT_OPERATOR_NAMESPACE.to_string(),
            pod_name: None,
        }
    }
}

impl ControllerConfig {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        use crate::constants::*;
        Self {
            recreate_delay_secs: env_var_or_default(
                "RECREATE_DELAY_SECS",
                DEFAULT_RECREATE_DELAY_SECS,
            ),
            sync_changed_delay_secs: env_var_or_default(
                "SYNC_CHANGED_DELAY_SECS",
                DEFAULT_SYNC_CHANGED_DELAY_SECS,
            ),
            min_requeue_secs: env_var_or_default("MIN_REQUEUE_SECS", MIN_REQUEUE_SECS),
            backoff_min_secs: env_var_or_default("BACKOFF_MIN_SECS", DEFAULT_BACKOFF_MIN_SECS),
            backoff_max_secs: env_var_or_default("BACKOFF_MAX_SECS", DEFAULT_BACKOFF_MAX_SECS),
            watch_restart_delay_secs: env_var_or_default(
                "WATCH_RESTART_DELAY_SECS",
                DEFAULT_WATCH_RESTART_DELAY_SECS,
            ),
            max_concurrent_reconciliations: env_var_or_default(
                "MAX_CONCURRENT_RECONCILIATIONS",
                DEFAULT_MAX_CONCURRENT_RECONCILIATIONS,
            ),
            metrics_port: env_var_or_default("METRICS_PORT", DEFAULT_METRICS_PORT),
            operator_namespace: env_var_or_default_str("POD_NAMESPACE", DEFAULT_OPERATOR_NAMESPACE),
            pod_name: std::env::var("POD_NAME").ok().filter(|v| !v.is_empty()),
        }
    }

    pub fn recreate_delay(&self) -> Duration {
        Duration::from_secs(self.recreate_delay_secs)
    }

    pub fn sync_changed_delay(&self) -> Duration {
        Duration::from_secs(self.sync_changed_delay_secs)
    }

    pub fn min_requeue(&self) -> Duration {
        Duration::from_secs(self.min_requeue_secs)
    }

    pub fn watch_restart_delay(&self) -> Duration {
        Duration::from_secs(self.watch_restart_delay_secs)
    }
}

/// Certificate manager timings
#[derive(Debug, Clone)]
pub struct CertManagerConfig {
    pub lease_duration: Duration,
    pub renew_interval: Duration,
    pub retry_interval: Duration,
    pub check_interval: Duration,
    /// Re-issue when fewer than this many days remain
    pub renewal_threshold_days: i64,
    pub cert_validity_days: i64,
    pub ca_validity_days: i64,
}

impl Default for CertManagerConfig {
    fn default() -> Self {
        use crate::constants::*;
        Self {
            lease_duration: Duration::from_secs(LEASE_DURATION_SECS),
            renew_interval: Duration::from_secs(LEASE_RENEW_SECS),
            retry_interval: Duration::from_secs(LEASE_RETRY_SECS),
            check_interval: Duration::from_secs(CERT_CHECK_INTERVAL_SECS),
            renewal_threshold_days: CERT_RENEWAL_THRESHOLD_DAYS,
            cert_validity_days: CERT_VALIDITY_DAYS,
            ca_validity_days: CA_VALIDITY_DAYS,
        }
    }
}

impl CertManagerConfig {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            lease_duration: Duration::from_secs(env_var_or_default(
                "CERT_LEASE_DURATION_SECS",
                defaults.lease_duration.as_secs(),
            )),
            renew_interval: Duration::from_secs(env_var_or_default(
                "CERT_LEASE_RENEW_SECS",
                defaults.renew_interval.as_secs(),
            )),
            retry_interval: Duration::from_secs(env_var_or_default(
                "CERT_LEASE_RETRY_SECS",
                defaults.retry_interval.as_secs(),
            )),
            check_interval: Duration::from_secs(env_var_or_default(
                "CERT_CHECK_INTERVAL_SECS",
                defaults.check_interval.as_secs(),
            )),
            renewal_threshold_days: env_var_or_default(
                "CERT_RENEWAL_THRESHOLD_DAYS",
                defaults.renewal_threshold_days,
            ),
            ..defaults
        }
    }
}

/// Read environment variable or return default value
fn env_var_or_default<T: std::str::FromStr>(key: &str, default: T) -> T
where
    <T as std::str::FromStr>::Err: std::fmt::Debug,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Read environment variable as string or return default
fn env_var_or_default_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

//! # Constants
//!
//! Shared constants used throughout the operator.
//!
//! Label and annotation keys are part of the public contract with workloads
//! and must not change between releases. Timing values are defaults; most can
//! be overridden through [`crate::config`].

/// API group for the operator's custom resources
pub const API_GROUP: &str = "dhs.dockhand.dev";

/// Component name reported on Kubernetes Events
pub const EVENT_REPORTER: &str = "dockhand-secrets-operator";

/// Finalizer placed on DockhandSecrets so the output Secret is cleaned up
pub const FINALIZER: &str = "dhs.dockhand.dev/finalizer";

/// Workload opt-in label. Controller requires the value `"true"`, the webhook only presence.
pub const AUTO_UPDATE_LABEL_KEY: &str = "dhs.dockhand.dev/autoUpdate";

/// Back-reference from an output Secret to the DockhandSecret that owns it
pub const OWNER_LABEL_KEY: &str = "dhs.dockhand.dev/ownedByDockhandSecret";

/// Prefix of the per-owner labels stamped on dependent workloads
pub const SECRET_LABEL_PREFIX: &str = "secret.dhs.dockhand.dev/";

/// Pod template annotation holding the comma-joined, sorted list of referenced Secrets
pub const SECRET_NAMES_ANNOTATION_KEY: &str = "dhs.dockhand.dev/secretNames";

/// Pod template annotation holding the hex SHA-1 over referenced Secret data
pub const SECRET_CHECKSUM_ANNOTATION_KEY: &str = "dhs.dockhand.dev/secretChecksum";

/// Default HTTP server port for metrics and health probes
pub const DEFAULT_METRICS_PORT: u16 = 5000;

/// Default HTTP server startup timeout (how long to wait for server to be ready)
pub const DEFAULT_SERVER_STARTUP_TIMEOUT_SECS: u64 = 10;

/// Default HTTP server readiness poll interval
pub const DEFAULT_SERVER_POLL_INTERVAL_MS: u64 = 50;

/// Delay before recreating an output Secret that was deleted out from under us
pub const DEFAULT_RECREATE_DELAY_SECS: u64 = 30;

/// Delay before re-syncing an output Secret that was modified externally
pub const DEFAULT_SYNC_CHANGED_DELAY_SECS: u64 = 5;

/// Lower bound on any syncInterval-driven requeue
pub const MIN_REQUEUE_SECS: u64 = 5;

/// Reconciliation error backoff floor (seconds)
pub const DEFAULT_BACKOFF_MIN_SECS: u64 = 1;

/// Reconciliation error backoff ceiling (seconds)
pub const DEFAULT_BACKOFF_MAX_SECS: u64 = 300;

/// Default delay before restarting watch stream after unknown errors (seconds)
pub const DEFAULT_WATCH_RESTART_DELAY_SECS: u64 = 5;

/// Default concurrency bound for the controller runtime
pub const DEFAULT_MAX_CONCURRENT_RECONCILIATIONS: u16 = 10;

/// Webhook checksum attempts before falling back to an empty checksum
pub const WEBHOOK_CHECKSUM_ATTEMPTS: u32 = 5;

/// Sleep between webhook checksum attempts
pub const WEBHOOK_CHECKSUM_RETRY_SECS: u64 = 3;

/// Default webhook service name
pub const DEFAULT_WEBHOOK_NAME: &str = "dockhand-secrets-operator-webhook";

/// Default operator namespace
pub const DEFAULT_OPERATOR_NAMESPACE: &str = "dockhand-secrets-operator";

/// Default webhook HTTPS port
pub const DEFAULT_WEBHOOK_PORT: u16 = 8443;

/// Lease duration for the certificate manager
pub const LEASE_DURATION_SECS: u64 = 15;

/// How often the leader renews its lease
pub const LEASE_RENEW_SECS: u64 = 10;

/// How often a follower retries acquisition
pub const LEASE_RETRY_SECS: u64 = 2;

/// How often the leader re-checks certificate state
pub const CERT_CHECK_INTERVAL_SECS: u64 = 60;

/// Leaf certificates are re-issued when fewer than this many days remain
pub const CERT_RENEWAL_THRESHOLD_DAYS: i64 = 30;

/// Leaf certificate validity
pub const CERT_VALIDITY_DAYS: i64 = 365;

/// Self-signed CA validity
pub const CA_VALIDITY_DAYS: i64 = 3650;

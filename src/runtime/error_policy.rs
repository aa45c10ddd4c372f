//! # Error Policy
//!
//! Requeue decisions for failed reconciliations and classification of
//! controller stream errors.

use crate::controller::reconciler::{Reconciler, ReconcilerError};
use crate::crd::DockhandSecret;
use crate::observability::metrics;
use kube::ResourceExt;
use kube_runtime::controller::Action;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Requeue a failed DockhandSecret with per-resource Fibonacci backoff
///
/// Backoff state lives on the reconciler keyed by `namespace/name`, so one
/// failing resource never slows down another. A successful reconcile resets it.
pub fn handle_reconciliation_error(
    obj: Arc<DockhandSecret>,
    error: &ReconcilerError,
    ctx: Arc<Reconciler>,
) -> Action {
    let name = obj.name_any();
    let namespace = obj.namespace().unwrap_or_default();

    error!(
        resource.name = %name,
        resource.namespace = %namespace,
        reason = error.event_reason(),
        error = %error,
        "Reconciliation error"
    );
    metrics::increment_reconciliation_errors();

    let (delay_secs, error_count) = ctx
        .next_backoff(&format!("{namespace}/{name}"))
        .unwrap_or_else(|| {
            warn!("Failed to lock backoff state, using minimum backoff");
            (ctx.config.backoff_min_secs, 0)
        });

    info!(
        resource.name = %name,
        resource.namespace = %namespace,
        error_count,
        "Retrying with Fibonacci backoff in {}s",
        delay_secs
    );
    metrics::increment_requeues(error.metric_label());
    Action::requeue(Duration::from_secs(delay_secs))
}

/// How the watch loop should react to a controller stream error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchErrorKind {
    /// RBAC revoked or token expired
    Unauthorized,
    /// Resource version too old; a restart relists
    Expired,
    /// API server throttling or storage reinitializing
    Throttled,
    /// CRD missing or object already gone
    NotFound,
    Other,
}

impl WatchErrorKind {
    /// Classify from the error's debug rendering
    #[must_use]
    pub fn classify(error: &str) -> Self {
        // 404s returned as plain text surface wrapped in WatchFailed, check them before 401
        let not_found =
            error.contains("ObjectNotFound") || error.contains("404") || error.contains("not found");
        if (error.contains("401") || error.contains("Unauthorized")) && !not_found {
            Self::Unauthorized
        } else if error.contains("410") || error.contains("too old resource version") || error.contains("Gone") {
            Self::Expired
        } else if error.contains("429")
            || error.contains("storage is (re)initializing")
            || error.contains("TooManyRequests")
        {
            Self::Throttled
        } else if not_found {
            Self::NotFound
        } else {
            Self::Other
        }
    }
}

/// Log and pace a controller stream error
///
/// Returns `true` when the stream should keep going, `false` to stop the
/// controller so the watch loop restarts it.
pub async fn handle_watch_stream_error(error: &str, restart_delay: Duration) -> bool {
    match WatchErrorKind::classify(error) {
        WatchErrorKind::Unauthorized => {
            error!(error, "Watch authentication failed (401), check the operator's RBAC");
            tokio::time::sleep(restart_delay).await;
            false
        }
        WatchErrorKind::Expired => {
            warn!("Watch resource version expired (410), restarting watch");
            false
        }
        WatchErrorKind::Throttled => {
            warn!("API server throttling (429), backing off {}s", restart_delay.as_secs());
            tokio::time::sleep(restart_delay).await;
            false
        }
        WatchErrorKind::NotFound => {
            warn!(error, "Resource not found (404), is the DockhandSecret CRD installed?");
            true
        }
        WatchErrorKind::Other => {
            warn!(error, "Controller stream error");
            true
        }
    }
}

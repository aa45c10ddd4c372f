//! # Sync Planning
//!
//! Decides, without touching the cluster, what a reconcile pass must do for a
//! DockhandSecret given its status and the current time.

use crate::controller::validation::parse_optional_duration;
use crate::crd::{DockhandSecret, SecretState};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPlan {
    /// New generation or previous pass failed
    Full,
    /// Ready, and the sync interval has elapsed
    Resync { interval: Duration },
    /// Ready, sync interval not yet elapsed; come back later
    Wait(Duration),
    /// Ready without an interval; re-render only if the output Secret drifted
    CheckDrift,
}

/// Parsed `syncInterval`, `None` when unset, zero, or unparseable
#[must_use]
pub fn sync_interval(ds: &DockhandSecret) -> Option<Duration> {
    match parse_optional_duration(ds.spec.sync_interval.as_deref()) {
        Ok(Some(d)) if !d.is_zero() => Some(d),
        Ok(_) => None,
        Err(e) => {
            warn!(
                resource.name = ?ds.metadata.name,
                sync_interval = ?ds.spec.sync_interval,
                error = %e,
                "Ignoring unparseable syncInterval"
            );
            None
        }
    }
}

#[must_use]
pub fn plan(ds: &DockhandSecret, now: DateTime<Utc>, min_requeue: Duration) -> SyncPlan {
    let Some(status) = ds.status.as_ref() else {
        return SyncPlan::Full;
    };
    if !status.is_ready() || status.observed_generation != ds.metadata.generation {
        return SyncPlan::Full;
    }

    let Some(interval) = sync_interval(ds) else {
        return SyncPlan::CheckDrift;
    };

    let elapsed = status
        .sync_timestamp
        .as_deref()
        .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
        .and_then(|ts| (now - ts.with_timezone(&Utc)).to_std().ok());

    match elapsed {
        Some(elapsed) if elapsed < interval => SyncPlan::Wait((interval - elapsed).max(min_requeue)),
        _ => SyncPlan::Resync { interval },
    }
}

/// Live output Secret no longer matches what was last written
#[must_use]
pub fn has_drifted(observed_resource_version: Option<&str>, live_resource_version: Option<&str>) -> bool {
    match (observed_resource_version, live_resource_version) {
        (Some(observed), Some(live)) => observed != live,
        _ => true,
    }
}

/// A new generation is being processed and the resource is not already failing
#[must_use]
pub fn should_mark_pending(ds: &DockhandSecret) -> bool {
    let status = ds.status.as_ref();
    let state = status.and_then(|s| s.state);
    let observed = status.and_then(|s| s.observed_generation);
    observed != ds.metadata.generation
        && !matches!(state, Some(SecretState::Pending | SecretState::ErrApplied))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{DockhandSecretSpec, DockhandSecretStatus, ProfileRef, SecretSpec};
    use chrono::TimeZone;

    const MIN: Duration = Duration::from_secs(5);

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn dhs(interval: Option<&str>, generation: i64, status: Option<DockhandSecretStatus>) -> DockhandSecret {
        let mut ds = DockhandSecret::new(
            "creds",
            DockhandSecretSpec {
                sync_interval: interval.map(str::to_string),
                data: Default::default(),
                secret_spec: SecretSpec {
                    name: "out".to_string(),
                    type_: "Opaque".to_string(),
                    labels: Default::default(),
                    annotations: Default::default(),
                },
                profile: ProfileRef {
                    name: "p".to_string(),
                    namespace: None,
                },
            },
        );
        ds.metadata.generation = Some(generation);
        ds.status = status;
        ds
    }

    fn ready(generation: i64, synced: Option<&str>) -> DockhandSecretStatus {
        DockhandSecretStatus {
            state: Some(SecretState::Ready),
            observed_generation: Some(generation),
            observed_secret_resource_version: Some("10".to_string()),
            sync_timestamp: synced.map(str::to_string),
            ..Default::default()
        }
    }

    #[test]
    fn test_no_status_is_full() {
        assert_eq!(plan(&dhs(None, 1, None), now(), MIN), SyncPlan::Full);
    }

    #[test]
    fn test_new_generation_is_full() {
        let ds = dhs(None, 2, Some(ready(1, None)));
        assert_eq!(plan(&ds, now(), MIN), SyncPlan::Full);
    }

    #[test]
    fn test_err_applied_is_full() {
        let status = DockhandSecretStatus {
            state: Some(SecretState::ErrApplied),
            observed_generation: Some(1),
            ..Default::default()
        };
        assert_eq!(plan(&dhs(None, 1, Some(status)), now(), MIN), SyncPlan::Full);
    }

    #[test]
    fn test_ready_without_interval_checks_drift() {
        let ds = dhs(None, 1, Some(ready(1, Some("2024-05-01T11:00:00Z"))));
        assert_eq!(plan(&ds, now(), MIN), SyncPlan::CheckDrift);

        let ds = dhs(Some("0s"), 1, Some(ready(1, None)));
        assert_eq!(plan(&ds, now(), MIN), SyncPlan::CheckDrift);

        let ds = dhs(Some("soon"), 1, Some(ready(1, None)));
        assert_eq!(plan(&ds, now(), MIN), SyncPlan::CheckDrift);
    }

    #[test]
    fn test_interval_elapsed_resyncs() {
        let ds = dhs(Some("30m"), 1, Some(ready(1, Some("2024-05-01T11:00:00Z"))));
        assert_eq!(
            plan(&ds, now(), MIN),
            SyncPlan::Resync {
                interval: Duration::from_secs(1800)
            }
        );
    }

    #[test]
    fn test_interval_pending_waits_remaining() {
        let ds = dhs(Some("1h"), 1, Some(ready(1, Some("2024-05-01T11:30:00Z"))));
        assert_eq!(plan(&ds, now(), MIN), SyncPlan::Wait(Duration::from_secs(1800)));
    }

    #[test]
    fn test_wait_is_floored() {
        let ds = dhs(Some("1h"), 1, Some(ready(1, Some("2024-05-01T11:00:02Z"))));
        assert_eq!(plan(&ds, now(), MIN), SyncPlan::Wait(MIN));
    }

    #[test]
    fn test_missing_or_bad_timestamp_counts_as_elapsed() {
        let ds = dhs(Some("1h"), 1, Some(ready(1, None)));
        assert!(matches!(plan(&ds, now(), MIN), SyncPlan::Resync { .. }));

        let ds = dhs(Some("1h"), 1, Some(ready(1, Some("yesterday"))));
        assert!(matches!(plan(&ds, now(), MIN), SyncPlan::Resync { .. }));
    }

    #[test]
    fn test_drift() {
        assert!(!has_drifted(Some("10"), Some("10")));
        assert!(has_drifted(Some("10"), Some("11")));
        assert!(has_drifted(Some("10"), None));
        assert!(has_drifted(None, Some("10")));
    }

    #[test]
    fn test_pending_only_for_new_generations() {
        assert!(should_mark_pending(&dhs(None, 1, None)));
        assert!(should_mark_pending(&dhs(None, 2, Some(ready(1, None)))));
        assert!(!should_mark_pending(&dhs(None, 1, Some(ready(1, None)))));

        let failing = DockhandSecretStatus {
            state: Some(SecretState::ErrApplied),
            ..Default::default()
        };
        assert!(!should_mark_pending(&dhs(None, 2, Some(failing))));
    }
}

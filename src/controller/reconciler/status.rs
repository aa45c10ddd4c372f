//! # Status Updates
//!
//! Merge patches against the DockhandSecret status subresource. Fields left
//! as `None` are omitted from the patch so they keep their current value.

use crate::crd::{DockhandSecret, DockhandSecretStatus, SecretState};
use chrono::{DateTime, SecondsFormat, Utc};
use kube::Api;
use kube::api::{Patch, PatchParams};
use tracing::debug;

/// Status stamped after a successful write
#[must_use]
pub fn ready_status(
    generation: Option<i64>,
    secret_resource_version: Option<String>,
    now: DateTime<Utc>,
) -> DockhandSecretStatus {
    DockhandSecretStatus {
        state: Some(SecretState::Ready),
        observed_generation: generation,
        observed_annotation_checksum: None,
        observed_secret_resource_version: secret_resource_version,
        sync_timestamp: Some(now.to_rfc3339_opts(SecondsFormat::Secs, true)),
    }
}

/// Merge-patch `status`; a DockhandSecret deleted mid-pass is not an error
pub async fn patch_status(
    api: &Api<DockhandSecret>,
    name: &str,
    status: &DockhandSecretStatus,
) -> Result<(), kube::Error> {
    let patch = serde_json::json!({ "status": status });
    match api
        .patch_status(name, &PatchParams::default(), &Patch::Merge(&patch))
        .await
    {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(e)) if e.code == 404 => {
            debug!(resource.name = %name, "DockhandSecret deleted before status update");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Set only `state`
pub async fn set_state(
    api: &Api<DockhandSecret>,
    name: &str,
    state: SecretState,
) -> Result<(), kube::Error> {
    let status = DockhandSecretStatus {
        state: Some(state),
        ..Default::default()
    };
    patch_status(api, name, &status).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_ready_status_fields() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let status = ready_status(Some(4), Some("991".to_string()), now);
        assert!(status.is_ready());
        assert_eq!(status.observed_generation, Some(4));
        assert_eq!(status.observed_secret_resource_version.as_deref(), Some("991"));
        assert_eq!(status.sync_timestamp.as_deref(), Some("2024-05-01T12:00:00Z"));
        assert!(status.observed_annotation_checksum.is_none());
    }

    #[test]
    fn test_state_only_patch_omits_other_fields() {
        let status = DockhandSecretStatus {
            state: Some(SecretState::ErrApplied),
            ..Default::default()
        };
        let body = serde_json::json!({ "status": status });
        assert_eq!(body, serde_json::json!({"status": {"state": "ErrApplied"}}));
    }
}

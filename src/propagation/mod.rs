//! # Propagation
//!
//! Keeps dependent workloads rolling when the Secrets they consume change.
//!
//! For a Deployment, DaemonSet or StatefulSet the engine:
//!
//! 1. Determines the referenced Secret names (pod spec scan, or the
//!    `dhs.dockhand.dev/secretNames` annotation on the controller path)
//! 2. Hashes their data into `dhs.dockhand.dev/secretChecksum` on the pod
//!    template, which triggers a rollout whenever the data changes
//! 3. Stamps `secret.dhs.dockhand.dev/<owner>: "true"` labels so the controller
//!    can find the workload again when an owning DockhandSecret syncs
//! 4. Expresses the difference as an RFC 6902 JSON Patch
//!
//! The admission webhook and the controller share this code and differ only in
//! [`PropagationOptions`].

pub mod checksum;
pub mod lookup;
pub mod names;
pub mod patch;
pub mod workload;

pub use checksum::{checksum_secrets, derive_labels, owners_of};
pub use lookup::{InMemorySecretLookup, KubeSecretLookup, SecretLookup};
pub use names::{collect_secret_names, format_secret_names, secret_names_from_annotations};
pub use patch::{diff_map, workload_patch};
pub use workload::{
    PropagationSummary, Workload, auto_update_enabled, auto_update_requested, plan_patch,
    propagate_to_dependents, sync_workload,
};

use crate::constants::{
    SECRET_CHECKSUM_ANNOTATION_KEY, SECRET_NAMES_ANNOTATION_KEY, WEBHOOK_CHECKSUM_ATTEMPTS,
    WEBHOOK_CHECKSUM_RETRY_SECS,
};
use k8s_openapi::api::core::v1::Secret;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum PropagationError {
    #[error("secret {namespace}/{name} not found")]
    SecretNotFound { namespace: String, name: String },

    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),
}

/// How many times to try reading referenced Secrets before giving up
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
    /// Fall back to an empty checksum instead of failing once attempts run out
    pub empty_on_exhaustion: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct PropagationOptions {
    /// Read Secret names from the `secretNames` annotation when present
    pub prefer_annotation: bool,
    pub retry: RetryPolicy,
}

impl PropagationOptions {
    /// Webhook behavior: scan the pod spec, retry, never fail the admission
    #[must_use]
    pub fn admission() -> Self {
        Self {
            prefer_annotation: false,
            retry: RetryPolicy {
                attempts: WEBHOOK_CHECKSUM_ATTEMPTS,
                delay: Duration::from_secs(WEBHOOK_CHECKSUM_RETRY_SECS),
                empty_on_exhaustion: true,
            },
        }
    }

    /// Controller behavior: trust the annotation, single attempt, fail fast
    #[must_use]
    pub fn controller() -> Self {
        Self {
            prefer_annotation: true,
            retry: RetryPolicy {
                attempts: 1,
                delay: Duration::ZERO,
                empty_on_exhaustion: false,
            },
        }
    }
}

/// Labels and pod-template annotations a workload should carry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedMetadata {
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    pub checksum: String,
}

/// Fetch every named Secret. Returns what was found plus the first error.
async fn fetch_all(
    lookup: &dyn SecretLookup,
    namespace: &str,
    names: &[String],
) -> (Vec<Secret>, Option<PropagationError>) {
    let mut found = Vec::with_capacity(names.len());
    let mut first_error = None;
    for name in names {
        match lookup.get(namespace, name).await {
            Ok(secret) => found.push(secret),
            Err(e) => {
                first_error.get_or_insert(e);
            }
        }
    }
    (found, first_error)
}

/// Compute the metadata a workload should carry given its referenced Secrets
pub async fn derive_metadata(
    lookup: &dyn SecretLookup,
    namespace: &str,
    labels: &BTreeMap<String, String>,
    annotations: &BTreeMap<String, String>,
    secret_names: &[String],
    retry: &RetryPolicy,
) -> Result<DerivedMetadata, PropagationError> {
    let attempts = retry.attempts.max(1);
    let mut attempt = 0;

    let (checksum, owners) = loop {
        attempt += 1;
        let (found, error) = fetch_all(lookup, namespace, secret_names).await;
        let Some(error) = error else {
            break (checksum_secrets(&found), owners_of(&found));
        };

        if attempt < attempts {
            warn!(
                resource.namespace = %namespace,
                attempt,
                error = %error,
                "Unable to calculate secret checksum, retrying"
            );
            tokio::time::sleep(retry.delay).await;
            continue;
        }

        if retry.empty_on_exhaustion {
            warn!(
                resource.namespace = %namespace,
                attempts,
                error = %error,
                "Unable to calculate secret checksum, giving up"
            );
            break (String::new(), owners_of(&found));
        }
        return Err(error);
    };

    let mut new_annotations = annotations.clone();
    new_annotations.insert(SECRET_CHECKSUM_ANNOTATION_KEY.to_string(), checksum.clone());
    new_annotations.insert(
        SECRET_NAMES_ANNOTATION_KEY.to_string(),
        format_secret_names(secret_names),
    );

    Ok(DerivedMetadata {
        labels: derive_labels(labels, &owners),
        annotations: new_annotations,
        checksum,
    })
}

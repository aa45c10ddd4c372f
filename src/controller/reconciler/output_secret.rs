//! # Output Secret
//!
//! Builds the native Secret a DockhandSecret renders into and writes it with
//! create-or-replace semantics.

use crate::constants::OWNER_LABEL_KEY;
use crate::crd::DockhandSecret;
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{ObjectMeta, PostParams};
use kube::{Api, ResourceExt};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Created,
    Updated,
    /// Replace was a no-op on the server; resourceVersion unchanged
    Unchanged,
}

impl WriteOutcome {
    #[must_use]
    pub fn verb(self) -> &'static str {
        match self {
            WriteOutcome::Created => "created",
            WriteOutcome::Updated | WriteOutcome::Unchanged => "updated",
        }
    }
}

/// Merge `ds` metadata into `existing` (or a fresh Secret) and replace its data
///
/// Labels and annotations from the spec are added on top of whatever is
/// already there; data is replaced wholesale so removed keys disappear.
#[must_use]
pub fn build_output_secret(
    existing: Option<Secret>,
    ds: &DockhandSecret,
    namespace: &str,
    data: BTreeMap<String, String>,
) -> Secret {
    let spec = &ds.spec.secret_spec;
    let mut secret = existing.unwrap_or_else(|| Secret {
        metadata: ObjectMeta {
            name: Some(spec.name.clone()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        ..Default::default()
    });

    let labels = secret.labels_mut();
    labels.extend(spec.labels.iter().map(|(k, v)| (k.clone(), v.clone())));
    labels.insert(OWNER_LABEL_KEY.to_string(), ds.name_any());

    let annotations = secret.annotations_mut();
    annotations.extend(spec.annotations.iter().map(|(k, v)| (k.clone(), v.clone())));

    secret.type_ = Some(spec.type_.clone());
    secret.string_data = None;
    secret.data = Some(
        data.into_iter()
            .map(|(k, v)| (k, ByteString(v.into_bytes())))
            .collect(),
    );
    secret
}

/// Create `secret` if it is new, otherwise replace it (optimistic on resourceVersion)
pub async fn write_output_secret(
    api: &Api<Secret>,
    secret: &Secret,
) -> Result<(Secret, WriteOutcome), kube::Error> {
    let previous = secret.resource_version();
    match previous {
        None => {
            let created = api.create(&PostParams::default(), secret).await?;
            Ok((created, WriteOutcome::Created))
        }
        Some(previous) => {
            let replaced = api
                .replace(&secret.name_any(), &PostParams::default(), secret)
                .await?;
            let outcome = if replaced.resource_version().as_deref() == Some(previous.as_str()) {
                WriteOutcome::Unchanged
            } else {
                WriteOutcome::Updated
            };
            Ok((replaced, outcome))
        }
    }
}

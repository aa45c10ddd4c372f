//! Checksum and owner-label derivation over referenced Secrets.

use crate::constants::{OWNER_LABEL_KEY, SECRET_LABEL_PREFIX};
use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use sha1::{Digest, Sha1};
use std::collections::BTreeMap;

/// Hex SHA-1 over the data of `secrets`.
///
/// Secrets are visited in name order and each Secret's keys in key order, so
/// the result depends only on the data itself. Key and value bytes are fed in
/// sequence without separators.
#[must_use]
pub fn checksum_secrets(secrets: &[Secret]) -> String {
    let mut ordered: Vec<&Secret> = secrets.iter().collect();
    ordered.sort_by_key(|s| s.name_any());

    let mut hasher = Sha1::new();
    for secret in ordered {
        for (key, value) in secret.data.iter().flatten() {
            hasher.update(key.as_bytes());
            hasher.update(&value.0);
        }
    }
    hex::encode(hasher.finalize())
}

/// DockhandSecret names recorded on `secrets` through the owner label
#[must_use]
pub fn owners_of(secrets: &[Secret]) -> Vec<String> {
    let mut owners: Vec<String> = secrets
        .iter()
        .filter_map(|s| s.labels().get(OWNER_LABEL_KEY))
        .filter(|o| !o.is_empty())
        .cloned()
        .collect();
    owners.sort();
    owners.dedup();
    owners
}

/// Replace every `secret.dhs.dockhand.dev/*` label with one per owner
#[must_use]
pub fn derive_labels(current: &BTreeMap<String, String>, owners: &[String]) -> BTreeMap<String, String> {
    let mut labels: BTreeMap<String, String> = current
        .iter()
        .filter(|(k, _)| !k.starts_with(SECRET_LABEL_PREFIX))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    for owner in owners {
        labels.insert(format!("{SECRET_LABEL_PREFIX}{owner}"), "true".to_string());
    }
    labels
}

//! # DockhandSecret
//!
//! The `Secret.dhs.dockhand.dev` custom resource. Each one renders a single
//! native Secret whose values are templates evaluated against the backends of
//! the referenced Profile.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// DockhandSecret Custom Resource Definition
///
/// # Example
///
/// ```yaml
/// apiVersion: dhs.dockhand.dev/v1alpha2
/// kind: Secret
/// metadata:
///   name: db-credentials
///   namespace: apps
/// spec:
///   syncInterval: 10m
///   profile:
///     name: vault-profile
///   secretSpec:
///     name: db
///     labels:
///       team: payments
///   data:
///     password: '<< vault "db" "password" >>'
/// ```
#[derive(kube::CustomResource, Debug, Clone, Deserialize, Serialize, schemars::JsonSchema)]
#[kube(
    kind = "Secret",
    root = "DockhandSecret",
    group = "dhs.dockhand.dev",
    version = "v1alpha2",
    namespaced,
    status = "crate::crd::DockhandSecretStatus",
    shortname = "dhs",
    printcolumn = r#"{"name":"State", "type":"string", "jsonPath":".status.state"}, {"name":"Secret", "type":"string", "jsonPath":".spec.secretSpec.name"}, {"name":"Synced", "type":"string", "jsonPath":".status.syncTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct DockhandSecretSpec {
    /// Periodic re-render interval, Go duration syntax (`30s`, `1h30m`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_interval: Option<String>,
    /// Output key to template string
    #[serde(default)]
    pub data: BTreeMap<String, String>,
    pub secret_spec: SecretSpec,
    pub profile: ProfileRef,
}

/// Shape of the output Secret
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SecretSpec {
    pub name: String,
    #[serde(default = "default_secret_type", rename = "type")]
    pub type_: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

/// Reference to a Profile. An empty namespace means the DockhandSecret's own.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ProfileRef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl ProfileRef {
    /// Namespace the profile lives in, defaulting to `own_namespace`
    #[must_use]
    pub fn effective_namespace<'a>(&'a self, own_namespace: &'a str) -> &'a str {
        match self.namespace.as_deref() {
            Some(ns) if !ns.is_empty() => ns,
            _ => own_namespace,
        }
    }
}

#[must_use]
pub fn default_secret_type() -> String {
    "Opaque".to_string()
}

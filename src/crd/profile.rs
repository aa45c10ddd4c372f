//! # Profile
//!
//! The `Profile.dhs.dockhand.dev` custom resource. A profile declares which
//! secret backends are available to DockhandSecrets that reference it, and how
//! to authenticate against each. Several backend blocks may coexist.

use serde::{Deserialize, Serialize};

/// Profile Custom Resource Definition
///
/// # Example
///
/// ```yaml
/// apiVersion: dhs.dockhand.dev/v1alpha2
/// kind: Profile
/// metadata:
///   name: vault-profile
///   namespace: apps
/// spec:
///   vault:
///     addr: https://vault.internal:8200
///     cacheTTL: 60s
///     tokenRef:
///       name: vault-token
///       key: token
/// ```
#[derive(
    kube::CustomResource, Debug, Clone, Default, Deserialize, Serialize, schemars::JsonSchema,
)]
#[kube(
    kind = "Profile",
    root = "DockhandProfile",
    group = "dhs.dockhand.dev",
    version = "v1alpha2",
    namespaced,
    shortname = "dhp"
)]
#[serde(rename_all = "camelCase")]
pub struct ProfileSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aws_secrets_manager: Option<AwsSecretsManagerProfile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub azure_key_vault: Option<AzureKeyVaultProfile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gcp_secrets_manager: Option<GcpSecretsManagerProfile>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vault: Option<VaultProfile>,
}

/// Key inside a Secret in the Profile's namespace
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq, Hash, schemars::JsonSchema)]
pub struct SecretRef {
    pub name: String,
    pub key: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AwsSecretsManagerProfile {
    #[serde(default, rename = "cacheTTL", skip_serializing_if = "Option::is_none")]
    pub cache_ttl: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub region: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_key_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_access_key_ref: Option<SecretRef>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AzureKeyVaultProfile {
    #[serde(default, rename = "cacheTTL", skip_serializing_if = "Option::is_none")]
    pub cache_ttl: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret_ref: Option<SecretRef>,
    /// Vault name (`myvault`) or full URL (`https://myvault.vault.azure.net/`)
    pub key_vault: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GcpSecretsManagerProfile {
    #[serde(default, rename = "cacheTTL", skip_serializing_if = "Option::is_none")]
    pub cache_ttl: Option<String>,
    pub project: String,
    /// Service-account JSON key. Without it the metadata server token is used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials_file_secret_ref: Option<SecretRef>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, schemars::JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VaultProfile {
    #[serde(default, rename = "cacheTTL", skip_serializing_if = "Option::is_none")]
    pub cache_ttl: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub addr: Option<String>,
    /// AppRole role id; used together with `secretIdRef`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_id_ref: Option<SecretRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_ref: Option<SecretRef>,
}

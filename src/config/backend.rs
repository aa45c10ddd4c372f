//! # Backend Defaults
//!
//! Operator-wide fallbacks for backend settings. Values set on a Profile always
//! take precedence.

#[derive(Clone, Default)]
pub struct BackendDefaults {
    pub aws_region: Option<String>,
    pub aws_access_key_id: Option<String>,
    pub aws_secret_access_key: Option<String>,
    pub azure_tenant: Option<String>,
    pub azure_client_id: Option<String>,
    pub azure_client_secret: Option<String>,
    pub vault_addr: Option<String>,
    pub vault_token: Option<String>,
    pub vault_role_id: Option<String>,
    pub vault_secret_id: Option<String>,
}

impl std::fmt::Debug for BackendDefaults {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendDefaults")
            .field("aws_region", &self.aws_region)
            .field("aws_access_key_id", &self.aws_access_key_id)
            .field("azure_tenant", &self.azure_tenant)
            .field("azure_client_id", &self.azure_client_id)
            .field("vault_addr", &self.vault_addr)
            .field("vault_role_id", &self.vault_role_id)
            .finish_non_exhaustive()
    }
}

/// Treat empty strings from env/CLI as unset
pub(crate) fn non_empty(value: Option<&String>) -> Option<String> {
    value.filter(|v| !v.is_empty()).cloned()
}

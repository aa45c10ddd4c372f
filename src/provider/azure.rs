//! # Azure Key Vault
//!
//! Reads secrets from Azure Key Vault. Authentication, in order of preference:
//!
//! - Service principal (`tenant`, `clientId` and `clientSecretRef` on the profile)
//! - Workload Identity (`clientId` only)
//! - Managed Identity

use super::{BackendError, BackendKind, SecretFetcher};
use azure_core::credentials::{Secret, TokenCredential};
use azure_identity::{ClientSecretCredential, ManagedIdentityCredential, WorkloadIdentityCredential};
use azure_security_keyvault_secrets::SecretClient;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// Connection settings after profile and operator defaults are merged
#[derive(Default)]
pub struct AzureSettings<'a> {
    pub key_vault: &'a str,
    pub tenant: Option<&'a str>,
    pub client_id: Option<&'a str>,
    pub client_secret: Option<&'a str>,
}

/// Azure Key Vault fetcher
pub struct AzureKeyVaultFetcher {
    client: SecretClient,
    vault_url: String,
}

impl std::fmt::Debug for AzureKeyVaultFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AzureKeyVaultFetcher")
            .field("vault_url", &self.vault_url)
            .finish_non_exhaustive()
    }
}

/// Vault name (`myvault`) or full URL to the vault endpoint
#[must_use]
pub fn vault_url(key_vault: &str) -> String {
    if key_vault.starts_with("https://") || key_vault.starts_with("http://") {
        key_vault.to_string()
    } else {
        format!("https://{key_vault}.vault.azure.net/")
    }
}

fn build_credential(settings: &AzureSettings<'_>) -> Result<Arc<dyn TokenCredential>, BackendError> {
    fn non_empty(v: Option<&str>) -> Option<&str> {
        v.filter(|s| !s.is_empty())
    }

    match (
        non_empty(settings.tenant),
        non_empty(settings.client_id),
        non_empty(settings.client_secret),
    ) {
        (Some(tenant), Some(client_id), Some(client_secret)) => {
            info!(azure.client_id = client_id, "Using Azure service principal authentication");
            let credential = ClientSecretCredential::new(
                tenant,
                client_id.to_string(),
                Secret::new(client_secret.to_string()),
                None,
            )
            .map_err(|e| BackendError::auth(BackendKind::Azure, e.to_string()))?;
            Ok(credential)
        }
        (_, Some(client_id), None) => {
            info!(azure.client_id = client_id, "Using Azure Workload Identity authentication");
            let options = azure_identity::WorkloadIdentityCredentialOptions {
                client_id: Some(client_id.to_string()),
                ..Default::default()
            };
            let credential = WorkloadIdentityCredential::new(Some(options))
                .map_err(|e| BackendError::auth(BackendKind::Azure, e.to_string()))?;
            Ok(credential)
        }
        _ => {
            info!("Using Azure Managed Identity authentication");
            let credential = ManagedIdentityCredential::new(None)
                .map_err(|e| BackendError::auth(BackendKind::Azure, e.to_string()))?;
            Ok(credential)
        }
    }
}

impl AzureKeyVaultFetcher {
    pub fn new(settings: &AzureSettings<'_>) -> Result<Self, BackendError> {
        if settings.key_vault.is_empty() {
            return Err(BackendError::config(BackendKind::Azure, "keyVault is required"));
        }

        let vault_url = vault_url(settings.key_vault);
        let credential = build_credential(settings)?;
        let client = SecretClient::new(&vault_url, credential, None)
            .map_err(|e| BackendError::config(BackendKind::Azure, e.to_string()))?;

        Ok(Self { client, vault_url })
    }
}

#[async_trait]
impl SecretFetcher for AzureKeyVaultFetcher {
    fn kind(&self) -> BackendKind {
        BackendKind::Azure
    }

    async fn fetch(&self, name: &str) -> Result<String, BackendError> {
        use azure_security_keyvault_secrets::models::Secret as KeyVaultSecret;

        let response = self.client.get_secret(name, None).await.map_err(|e| {
            let message = e.to_string();
            if message.contains("SecretNotFound") || message.contains("404") {
                BackendError::NotFound {
                    backend: BackendKind::Azure,
                    name: name.to_string(),
                }
            } else {
                BackendError::request(BackendKind::Azure, name, message)
            }
        })?;

        let secret: KeyVaultSecret = serde_json::from_slice(&response.into_body())
            .map_err(|e| BackendError::request(BackendKind::Azure, name, e.to_string()))?;

        secret
            .value
            .ok_or_else(|| BackendError::request(BackendKind::Azure, name, "secret has no value"))
    }
}

//! # Credential Resolution
//!
//! Profiles reference credentials indirectly through [`SecretRef`]s. This
//! module reads those keys from native Secrets in the Profile's namespace and
//! combines them with operator-wide [`BackendDefaults`].

use super::BackendError;
use crate::config::BackendDefaults;
use crate::crd::{ProfileSpec, SecretRef};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Fallback key used when a Vault `tokenRef` leaves `key` empty
pub const VAULT_TOKEN_KEY: &str = "VAULT_TOKEN";

/// Fallback key used when a Vault `secretIdRef` leaves `key` empty
pub const VAULT_SECRET_ID_KEY: &str = "VAULT_SECRET_ID";

/// Reads a single key out of a Secret
#[async_trait]
pub trait SecretRefResolver: Send + Sync + std::fmt::Debug {
    async fn resolve(&self, namespace: &str, secret_ref: &SecretRef) -> Result<String, BackendError>;
}

#[derive(Clone)]
pub struct KubeSecretRefResolver {
    client: Client,
}

impl std::fmt::Debug for KubeSecretRefResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeSecretRefResolver").finish_non_exhaustive()
    }
}

impl KubeSecretRefResolver {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SecretRefResolver for KubeSecretRefResolver {
    async fn resolve(&self, namespace: &str, secret_ref: &SecretRef) -> Result<String, BackendError> {
        let err = |message: String| BackendError::CredentialRef {
            namespace: namespace.to_string(),
            name: secret_ref.name.clone(),
            key: secret_ref.key.clone(),
            message,
        };

        let secrets: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let secret = secrets
            .get(&secret_ref.name)
            .await
            .map_err(|e| err(e.to_string()))?;

        let bytes = secret
            .data
            .as_ref()
            .and_then(|d| d.get(&secret_ref.key))
            .ok_or_else(|| err("key not present".to_string()))?;

        String::from_utf8(bytes.0.clone()).map_err(|e| err(e.to_string()))
    }
}

/// Credential material resolved for one Profile
#[derive(Default, Zeroize, ZeroizeOnDrop)]
pub struct ResolvedCredentials {
    pub aws_access_key_id: Option<String>,
    pub aws_secret_access_key: Option<String>,
    pub azure_client_id: Option<String>,
    pub azure_client_secret: Option<String>,
    pub gcp_credentials_json: Option<String>,
    pub vault_addr: Option<String>,
    pub vault_token: Option<String>,
    pub vault_role_id: Option<String>,
    pub vault_secret_id: Option<String>,
}

impl std::fmt::Debug for ResolvedCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedCredentials")
            .field("aws_access_key_id", &self.aws_access_key_id)
            .field("azure_client_id", &self.azure_client_id)
            .field("vault_addr", &self.vault_addr)
            .field("vault_role_id", &self.vault_role_id)
            .finish_non_exhaustive()
    }
}

impl ResolvedCredentials {
    /// Stable byte representation folded into the registry's config hash
    pub(crate) fn fingerprint(&self) -> Vec<u8> {
        let fields = [
            &self.aws_access_key_id,
            &self.aws_secret_access_key,
            &self.azure_client_id,
            &self.azure_client_secret,
            &self.gcp_credentials_json,
            &self.vault_addr,
            &self.vault_token,
            &self.vault_role_id,
            &self.vault_secret_id,
        ];
        let mut out = Vec::new();
        for field in fields {
            if let Some(v) = field {
                out.extend_from_slice(v.as_bytes());
            }
            out.push(0);
        }
        out
    }
}

fn with_fallback_key(secret_ref: &SecretRef, fallback: &str) -> SecretRef {
    if secret_ref.key.is_empty() {
        SecretRef {
            name: secret_ref.name.clone(),
            key: fallback.to_string(),
        }
    } else {
        secret_ref.clone()
    }
}

/// Resolve every credential the profile references, applying operator defaults
pub async fn resolve_credentials(
    resolver: &dyn SecretRefResolver,
    namespace: &str,
    spec: &ProfileSpec,
    defaults: &BackendDefaults,
) -> Result<ResolvedCredentials, BackendError> {
    use crate::config::backend_non_empty as non_empty;

    let mut creds = ResolvedCredentials::default();

    if let Some(aws) = &spec.aws_secrets_manager {
        creds.aws_access_key_id = aws
            .access_key_id
            .clone()
            .or_else(|| non_empty(defaults.aws_access_key_id.as_ref()));
        creds.aws_secret_access_key = match &aws.secret_access_key_ref {
            Some(r) => Some(resolver.resolve(namespace, r).await?),
            None => non_empty(defaults.aws_secret_access_key.as_ref()),
        };
    }

    if let Some(azure) = &spec.azure_key_vault {
        creds.azure_client_id = azure
            .client_id
            .clone()
            .or_else(|| non_empty(defaults.azure_client_id.as_ref()));
        creds.azure_client_secret = match &azure.client_secret_ref {
            Some(r) => Some(resolver.resolve(namespace, r).await?),
            None => non_empty(defaults.azure_client_secret.as_ref()),
        };
    }

    if let Some(gcp) = &spec.gcp_secrets_manager {
        if let Some(r) = &gcp.credentials_file_secret_ref {
            creds.gcp_credentials_json = Some(resolver.resolve(namespace, r).await?);
        }
    }

    if let Some(vault) = &spec.vault {
        creds.vault_addr = vault
            .addr
            .clone()
            .filter(|a| !a.is_empty())
            .or_else(|| non_empty(defaults.vault_addr.as_ref()));
        creds.vault_role_id = vault
            .role_id
            .clone()
            .or_else(|| non_empty(defaults.vault_role_id.as_ref()));
        creds.vault_secret_id = match &vault.secret_id_ref {
            Some(r) => Some(
                resolver
                    .resolve(namespace, &with_fallback_key(r, VAULT_SECRET_ID_KEY))
                    .await?,
            ),
            None => non_empty(defaults.vault_secret_id.as_ref()),
        };
        creds.vault_token = match &vault.token_ref {
            Some(r) => Some(
                resolver
                    .resolve(namespace, &with_fallback_key(r, VAULT_TOKEN_KEY))
                    .await?,
            ),
            None => non_empty(defaults.vault_token.as_ref()),
        };
    }

    Ok(creds)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::{BackendError, SecretRef, SecretRefResolver};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// In-memory resolver keyed by `namespace/name/key`
    #[derive(Debug, Default)]
    pub struct MapResolver {
        pub values: Mutex<HashMap<String, String>>,
    }

    impl MapResolver {
        pub fn with(entries: &[(&str, &str)]) -> Self {
            let values = entries
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect();
            Self {
                values: Mutex::new(values),
            }
        }

        pub fn set(&self, key: &str, value: &str) {
            self.values
                .lock()
                .unwrap()
                .insert(key.to_string(), value.to_string());
        }
    }

    #[async_trait]
    impl SecretRefResolver for MapResolver {
        async fn resolve(
            &self,
            namespace: &str,
            secret_ref: &SecretRef,
        ) -> Result<String, BackendError> {
            let key = format!("{namespace}/{}/{}", secret_ref.name, secret_ref.key);
            self.values
                .lock()
                .unwrap()
                .get(&key)
                .cloned()
                .ok_or_else(|| BackendError::CredentialRef {
                    namespace: namespace.to_string(),
                    name: secret_ref.name.clone(),
                    key: secret_ref.key.clone(),
                    message: "not found".to_string(),
                })
        }
    }
}

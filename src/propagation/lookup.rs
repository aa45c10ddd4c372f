//! Secret sources for checksum computation.

use super::PropagationError;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client};
use std::collections::HashMap;
use std::sync::RwLock;

/// Reads Secrets by namespace and name
#[async_trait]
pub trait SecretLookup: Send + Sync {
    async fn get(&self, namespace: &str, name: &str) -> Result<Secret, PropagationError>;
}

/// Reads Secrets straight from the API server
#[derive(Clone)]
pub struct KubeSecretLookup {
    client: Client,
}

impl std::fmt::Debug for KubeSecretLookup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeSecretLookup").finish_non_exhaustive()
    }
}

impl KubeSecretLookup {
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SecretLookup for KubeSecretLookup {
    async fn get(&self, namespace: &str, name: &str) -> Result<Secret, PropagationError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        api.get(name).await.map_err(|e| match e {
            kube::Error::Api(ref resp) if resp.code == 404 => PropagationError::SecretNotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            },
            other => PropagationError::Kube(other),
        })
    }
}

/// Fixed set of Secrets, keyed by `namespace/name`
#[derive(Debug, Default)]
pub struct InMemorySecretLookup {
    secrets: RwLock<HashMap<String, Secret>>,
}

impl InMemorySecretLookup {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, namespace: &str, secret: Secret) {
        let name = secret.metadata.name.clone().unwrap_or_default();
        if let Ok(mut secrets) = self.secrets.write() {
            secrets.insert(format!("{namespace}/{name}"), secret);
        }
    }

    pub fn remove(&self, namespace: &str, name: &str) {
        if let Ok(mut secrets) = self.secrets.write() {
            secrets.remove(&format!("{namespace}/{name}"));
        }
    }
}

#[async_trait]
impl SecretLookup for InMemorySecretLookup {
    async fn get(&self, namespace: &str, name: &str) -> Result<Secret, PropagationError> {
        self.secrets
            .read()
            .ok()
            .and_then(|s| s.get(&format!("{namespace}/{name}")).cloned())
            .ok_or_else(|| PropagationError::SecretNotFound {
                namespace: namespace.to_string(),
                name: name.to_string(),
            })
    }
}

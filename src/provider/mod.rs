//! # Provider Modules
//!
//! Secret backends that DockhandSecret templates can read from.
//!
//! Each backend implements [`SecretFetcher`]: given a secret name it returns the
//! raw secret string. JSON key extraction, caching and the mapping from
//! template function names to backends live here so the individual clients
//! stay thin.
//!
//! ## Template Functions
//!
//! | Function    | Backend            | Arguments          |
//! |-------------|--------------------|--------------------|
//! | `aws`       | AWS Secrets Manager| `secretName key`   |
//! | `vault`     | Vault KV           | `path key`         |
//! | `azureJson` | Azure Key Vault    | `secretName key`   |
//! | `azureText` | Azure Key Vault    | `secretName`       |
//! | `gcpJson`   | GCP Secret Manager | `secretName key`   |
//! | `gcpText`   | GCP Secret Manager | `secretName`       |

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

pub mod aws;
pub mod azure;
pub mod cache;
pub mod credentials;
pub mod gcp;
pub mod registry;
pub mod vault;

pub use cache::CachedFetcher;
pub use credentials::{KubeSecretRefResolver, SecretRefResolver};
pub use registry::FetcherRegistry;

/// Closed set of supported secret backends
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BackendKind {
    Aws,
    Azure,
    Gcp,
    Vault,
}

impl BackendKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            BackendKind::Aws => "aws",
            BackendKind::Azure => "azure",
            BackendKind::Gcp => "gcp",
            BackendKind::Vault => "vault",
        }
    }
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("{0} backend is not configured on this profile")]
    NotConfigured(BackendKind),

    #[error("invalid {backend} configuration: {message}")]
    Config {
        backend: BackendKind,
        message: String,
    },

    #[error("{backend} authentication failed: {message}")]
    Auth {
        backend: BackendKind,
        message: String,
    },

    #[error("secret '{name}' not found in {backend}")]
    NotFound { backend: BackendKind, name: String },

    #[error("{backend} request for '{name}' failed: {message}")]
    Request {
        backend: BackendKind,
        name: String,
        message: String,
    },

    #[error("secret '{name}' is not a JSON object: {message}")]
    NotJson { name: String, message: String },

    #[error("key '{key}' not found in secret '{name}'")]
    MissingKey { name: String, key: String },

    #[error("could not read key '{key}' of secret {namespace}/{name}: {message}")]
    CredentialRef {
        namespace: String,
        name: String,
        key: String,
        message: String,
    },
}

impl BackendError {
    pub(crate) fn request(backend: BackendKind, name: &str, message: impl Into<String>) -> Self {
        BackendError::Request {
            backend,
            name: name.to_string(),
            message: message.into(),
        }
    }

    pub(crate) fn config(backend: BackendKind, message: impl Into<String>) -> Self {
        BackendError::Config {
            backend,
            message: message.into(),
        }
    }

    pub(crate) fn auth(backend: BackendKind, message: impl Into<String>) -> Self {
        BackendError::Auth {
            backend,
            message: message.into(),
        }
    }
}

/// A client able to read a single secret from one backend
#[async_trait]
pub trait SecretFetcher: Send + Sync + std::fmt::Debug {
    fn kind(&self) -> BackendKind;

    /// Fetch the raw secret string for `name`
    async fn fetch(&self, name: &str) -> Result<String, BackendError>;
}

/// Template functions exposed to DockhandSecret data templates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateFunction {
    Aws,
    Vault,
    AzureJson,
    AzureText,
    GcpJson,
    GcpText,
}

impl TemplateFunction {
    pub const ALL: [TemplateFunction; 6] = [
        TemplateFunction::Aws,
        TemplateFunction::Vault,
        TemplateFunction::AzureJson,
        TemplateFunction::AzureText,
        TemplateFunction::GcpJson,
        TemplateFunction::GcpText,
    ];

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            TemplateFunction::Aws => "aws",
            TemplateFunction::Vault => "vault",
            TemplateFunction::AzureJson => "azureJson",
            TemplateFunction::AzureText => "azureText",
            TemplateFunction::GcpJson => "gcpJson",
            TemplateFunction::GcpText => "gcpText",
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.name() == name)
    }

    #[must_use]
    pub fn backend(self) -> BackendKind {
        match self {
            TemplateFunction::Aws => BackendKind::Aws,
            TemplateFunction::Vault => BackendKind::Vault,
            TemplateFunction::AzureJson | TemplateFunction::AzureText => BackendKind::Azure,
            TemplateFunction::GcpJson | TemplateFunction::GcpText => BackendKind::Gcp,
        }
    }

    /// Whether the function takes a second `key` argument selecting a JSON field
    #[must_use]
    pub fn extracts_key(self) -> bool {
        !matches!(self, TemplateFunction::AzureText | TemplateFunction::GcpText)
    }

    #[must_use]
    pub fn arity(self) -> usize {
        if self.extracts_key() { 2 } else { 1 }
    }
}

/// Pull `key` out of a JSON object secret. Non-string values are rendered as JSON.
pub fn extract_json_key(name: &str, raw: &str, key: &str) -> Result<String, BackendError> {
    let value: serde_json::Value =
        serde_json::from_str(raw).map_err(|e| BackendError::NotJson {
            name: name.to_string(),
            message: e.to_string(),
        })?;

    let object = value.as_object().ok_or_else(|| BackendError::NotJson {
        name: name.to_string(),
        message: "expected a JSON object".to_string(),
    })?;

    match object.get(key) {
        Some(serde_json::Value::String(s)) => Ok(s.clone()),
        Some(other) => Ok(other.to_string()),
        None => Err(BackendError::MissingKey {
            name: name.to_string(),
            key: key.to_string(),
        }),
    }
}

/// The fetchers available to one resolved Profile
#[derive(Debug, Default, Clone)]
pub struct FetcherSet {
    fetchers: HashMap<BackendKind, Arc<dyn SecretFetcher>>,
}

impl FetcherSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, fetcher: Arc<dyn SecretFetcher>) {
        self.fetchers.insert(fetcher.kind(), fetcher);
    }

    #[must_use]
    pub fn get(&self, kind: BackendKind) -> Option<&Arc<dyn SecretFetcher>> {
        self.fetchers.get(&kind)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fetchers.is_empty()
    }

    #[must_use]
    pub fn backends(&self) -> Vec<BackendKind> {
        let mut kinds: Vec<_> = self.fetchers.keys().copied().collect();
        kinds.sort();
        kinds
    }

    /// Evaluate a template function. `key` must be present for JSON-extracting functions.
    pub async fn invoke(
        &self,
        function: TemplateFunction,
        name: &str,
        key: Option<&str>,
    ) -> Result<String, BackendError> {
        let backend = function.backend();
        let fetcher = self
            .get(backend)
            .ok_or(BackendError::NotConfigured(backend))?;

        let raw = fetcher.fetch(name).await?;

        match (function.extracts_key(), key) {
            (true, Some(key)) => extract_json_key(name, &raw, key),
            (true, None) => Err(BackendError::MissingKey {
                name: name.to_string(),
                key: String::new(),
            }),
            (false, _) => Ok(raw),
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::{BackendError, BackendKind, SecretFetcher};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// In-memory fetcher that counts calls
    #[derive(Debug)]
    pub struct StaticFetcher {
        pub kind: BackendKind,
        pub values: HashMap<String, String>,
        pub calls: AtomicUsize,
    }

    impl StaticFetcher {
        pub fn new(kind: BackendKind, values: &[(&str, &str)]) -> Self {
            Self {
                kind,
                values: values
                    .iter()
                    .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                    .collect(),
                calls: AtomicUsize::new(0),
            }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SecretFetcher for StaticFetcher {
        fn kind(&self) -> BackendKind {
            self.kind
        }

        async fn fetch(&self, name: &str) -> Result<String, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.values
                .get(name)
                .cloned()
                .ok_or_else(|| BackendError::NotFound {
                    backend: self.kind,
                    name: name.to_string(),
                })
        }
    }
}

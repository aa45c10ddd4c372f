//! # Fetcher Registry
//!
//! Per-profile pool of backend clients. Each entry is keyed by
//! `namespace/profile` and stamped with a SHA-256 over the profile spec plus
//! the resolved credential material, so an edited Profile or a rotated
//! credential Secret transparently produces fresh clients on the next lookup.
//!
//! Construction races are benign: two reconcilers building the same profile
//! concurrently both produce valid sets and the last insert wins.

use super::aws::{AwsSecretsManagerFetcher, AwsSettings};
use super::azure::{AzureKeyVaultFetcher, AzureSettings};
use super::cache::CachedFetcher;
use super::credentials::{ResolvedCredentials, SecretRefResolver, resolve_credentials};
use super::gcp::GcpSecretManagerFetcher;
use super::vault::{VaultFetcher, VaultSettings};
use super::{BackendError, BackendKind, FetcherSet, SecretFetcher};
use crate::config::BackendDefaults;
use crate::controller::validation::parse_optional_duration;
use crate::crd::{DockhandProfile, ProfileSpec};
use dashmap::DashMap;
use kube::ResourceExt;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

struct RegistryEntry {
    config_hash: String,
    fetchers: Arc<FetcherSet>,
}

pub struct FetcherRegistry {
    resolver: Arc<dyn SecretRefResolver>,
    defaults: BackendDefaults,
    entries: DashMap<String, RegistryEntry>,
}

impl std::fmt::Debug for FetcherRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetcherRegistry")
            .field("defaults", &self.defaults)
            .field("profiles", &self.entries.len())
            .finish_non_exhaustive()
    }
}

/// Parsed `cacheTTL` values; an absent TTL disables caching
#[derive(Debug, Default, Clone, Copy)]
struct CacheTtls {
    aws: Duration,
    azure: Duration,
    gcp: Duration,
    vault: Duration,
}

fn parse_cache_ttls(spec: &ProfileSpec) -> Result<CacheTtls, BackendError> {
    let parse = |backend: BackendKind, ttl: Option<&String>| {
        parse_optional_duration(ttl.map(String::as_str))
            .map(Option::unwrap_or_default)
            .map_err(|e| BackendError::config(backend, format!("cacheTTL: {e}")))
    };

    Ok(CacheTtls {
        aws: match &spec.aws_secrets_manager {
            Some(p) => parse(BackendKind::Aws, p.cache_ttl.as_ref())?,
            None => Duration::ZERO,
        },
        azure: match &spec.azure_key_vault {
            Some(p) => parse(BackendKind::Azure, p.cache_ttl.as_ref())?,
            None => Duration::ZERO,
        },
        gcp: match &spec.gcp_secrets_manager {
            Some(p) => parse(BackendKind::Gcp, p.cache_ttl.as_ref())?,
            None => Duration::ZERO,
        },
        vault: match &spec.vault {
            Some(p) => parse(BackendKind::Vault, p.cache_ttl.as_ref())?,
            None => Duration::ZERO,
        },
    })
}

/// SHA-256 over the profile spec and resolved credentials
pub(crate) fn config_hash(spec: &ProfileSpec, creds: &ResolvedCredentials) -> String {
    let mut hasher = Sha256::new();
    // Serializing a derived struct cannot fail
    hasher.update(serde_json::to_vec(spec).unwrap_or_default());
    hasher.update([0u8]);
    hasher.update(creds.fingerprint());
    hex::encode(hasher.finalize())
}

fn cached(fetcher: impl SecretFetcher + 'static, ttl: Duration) -> Arc<dyn SecretFetcher> {
    Arc::new(CachedFetcher::new(Arc::new(fetcher), ttl))
}

impl FetcherRegistry {
    #[must_use]
    pub fn new(resolver: Arc<dyn SecretRefResolver>, defaults: BackendDefaults) -> Self {
        Self {
            resolver,
            defaults,
            entries: DashMap::new(),
        }
    }

    /// Return the fetcher set for `profile`, building it if the config changed
    pub async fn get_or_create(
        &self,
        profile: &DockhandProfile,
    ) -> Result<Arc<FetcherSet>, BackendError> {
        let namespace = profile.namespace().unwrap_or_default();
        let key = format!("{}/{}", namespace, profile.name_any());

        let ttls = parse_cache_ttls(&profile.spec)?;
        let creds = resolve_credentials(
            self.resolver.as_ref(),
            &namespace,
            &profile.spec,
            &self.defaults,
        )
        .await?;
        let hash = config_hash(&profile.spec, &creds);

        if let Some(entry) = self.entries.get(&key) {
            if entry.config_hash == hash {
                debug!(profile = %key, "Reusing cached backend clients");
                return Ok(Arc::clone(&entry.fetchers));
            }
        }

        info!(profile = %key, "Building backend clients for profile");
        let fetchers = Arc::new(self.build(&profile.spec, &creds, ttls).await?);
        info!(profile = %key, backends = ?fetchers.backends(), "Backend clients ready");

        self.entries.insert(
            key,
            RegistryEntry {
                config_hash: hash,
                fetchers: Arc::clone(&fetchers),
            },
        );
        Ok(fetchers)
    }

    /// Drop cached clients for a profile
    pub fn invalidate(&self, namespace: &str, name: &str) {
        self.entries.remove(&format!("{namespace}/{name}"));
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    async fn build(
        &self,
        spec: &ProfileSpec,
        creds: &ResolvedCredentials,
        ttls: CacheTtls,
    ) -> Result<FetcherSet, BackendError> {
        let mut set = FetcherSet::new();

        if let Some(aws) = &spec.aws_secrets_manager {
            let region = aws
                .region
                .as_deref()
                .filter(|r| !r.is_empty())
                .or(self.defaults.aws_region.as_deref());
            let fetcher = AwsSecretsManagerFetcher::new(&AwsSettings {
                region,
                access_key_id: creds.aws_access_key_id.as_deref(),
                secret_access_key: creds.aws_secret_access_key.as_deref(),
                endpoint_url: None,
            })
            .await;
            set.insert(cached(fetcher, ttls.aws));
        }

        if let Some(azure) = &spec.azure_key_vault {
            let tenant = azure
                .tenant
                .as_deref()
                .filter(|t| !t.is_empty())
                .or(self.defaults.azure_tenant.as_deref());
            let fetcher = AzureKeyVaultFetcher::new(&AzureSettings {
                key_vault: &azure.key_vault,
                tenant,
                client_id: creds.azure_client_id.as_deref(),
                client_secret: creds.azure_client_secret.as_deref(),
            })?;
            set.insert(cached(fetcher, ttls.azure));
        }

        if let Some(gcp) = &spec.gcp_secrets_manager {
            let fetcher =
                GcpSecretManagerFetcher::new(&gcp.project, creds.gcp_credentials_json.as_deref())?;
            set.insert(cached(fetcher, ttls.gcp));
        }

        if spec.vault.is_some() {
            let fetcher = VaultFetcher::new(&VaultSettings {
                addr: creds.vault_addr.as_deref(),
                token: creds.vault_token.as_deref(),
                role_id: creds.vault_role_id.as_deref(),
                secret_id: creds.vault_secret_id.as_deref(),
            })?;
            set.insert(cached(fetcher, ttls.vault));
        }

        Ok(set)
    }
}

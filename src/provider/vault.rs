//! # HashiCorp Vault
//!
//! Reads KV secrets over Vault's HTTP API. Both KV v1 (`{"data": {...}}`) and
//! KV v2 (`{"data": {"data": {...}, "metadata": {...}}}`) response shapes are
//! accepted; the fetcher always returns the inner key/value object as JSON.
//!
//! Authentication is either a static token or an AppRole login
//! (`/v1/auth/approle/login`). AppRole tokens are cached for their lease and
//! re-acquired once on a 403.

use super::{BackendError, BackendKind, SecretFetcher};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

/// Connection settings after profile and operator defaults are merged
#[derive(Default)]
pub struct VaultSettings<'a> {
    pub addr: Option<&'a str>,
    pub token: Option<&'a str>,
    pub role_id: Option<&'a str>,
    pub secret_id: Option<&'a str>,
}

enum VaultAuth {
    Token(Zeroizing<String>),
    AppRole {
        role_id: String,
        secret_id: Zeroizing<String>,
    },
}

impl std::fmt::Debug for VaultAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VaultAuth::Token(_) => f.write_str("Token"),
            VaultAuth::AppRole { role_id, .. } => {
                f.debug_struct("AppRole").field("role_id", role_id).finish_non_exhaustive()
            }
        }
    }
}

#[derive(Serialize)]
struct AppRoleLoginRequest<'a> {
    role_id: &'a str,
    secret_id: &'a str,
}

#[derive(Deserialize)]
struct AppRoleLoginResponse {
    auth: AppRoleAuth,
}

#[derive(Deserialize)]
struct AppRoleAuth {
    client_token: String,
    #[serde(default)]
    lease_duration: u64,
}

#[derive(Deserialize)]
struct ReadResponse {
    data: Option<serde_json::Map<String, serde_json::Value>>,
}

#[derive(Debug, Deserialize)]
struct VaultErrors {
    #[serde(default)]
    errors: Vec<String>,
}

struct LoginToken {
    token: Zeroizing<String>,
    expires_at: Option<Instant>,
}

/// Vault KV fetcher
pub struct VaultFetcher {
    http_client: Client,
    addr: String,
    auth: VaultAuth,
    login: Mutex<Option<LoginToken>>,
}

impl std::fmt::Debug for VaultFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultFetcher")
            .field("addr", &self.addr)
            .field("auth", &self.auth)
            .finish_non_exhaustive()
    }
}

impl VaultFetcher {
    pub fn new(settings: &VaultSettings<'_>) -> Result<Self, BackendError> {
        fn non_empty(v: Option<&str>) -> Option<&str> {
            v.filter(|s| !s.is_empty())
        }

        let addr = non_empty(settings.addr)
            .ok_or_else(|| BackendError::config(BackendKind::Vault, "addr is required"))?;

        let auth = match (
            non_empty(settings.token),
            non_empty(settings.role_id),
            non_empty(settings.secret_id),
        ) {
            (Some(token), _, _) => {
                info!(vault.addr = addr, "Using Vault token authentication");
                VaultAuth::Token(Zeroizing::new(token.to_string()))
            }
            (None, Some(role_id), Some(secret_id)) => {
                info!(vault.addr = addr, vault.role_id = role_id, "Using Vault AppRole authentication");
                VaultAuth::AppRole {
                    role_id: role_id.to_string(),
                    secret_id: Zeroizing::new(secret_id.to_string()),
                }
            }
            _ => {
                return Err(BackendError::config(
                    BackendKind::Vault,
                    "either a token or roleId with secretId is required",
                ));
            }
        };

        let http_client = Client::builder()
            .build()
            .map_err(|e| BackendError::config(BackendKind::Vault, e.to_string()))?;

        Ok(Self {
            http_client,
            addr: addr.trim_end_matches('/').to_string(),
            auth,
            login: Mutex::new(None),
        })
    }

    async fn token(&self) -> Result<Zeroizing<String>, BackendError> {
        let (role_id, secret_id) = match &self.auth {
            VaultAuth::Token(token) => return Ok(token.clone()),
            VaultAuth::AppRole { role_id, secret_id } => (role_id, secret_id),
        };

        let mut login = self.login.lock().await;
        if let Some(current) = login.as_ref() {
            if current.expires_at.is_none_or(|at| Instant::now() < at) {
                return Ok(current.token.clone());
            }
        }

        let url = format!("{}/v1/auth/approle/login", self.addr);
        let response = self
            .http_client
            .post(&url)
            .json(&AppRoleLoginRequest {
                role_id,
                secret_id: secret_id.as_str(),
            })
            .send()
            .await
            .map_err(|e| BackendError::auth(BackendKind::Vault, e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let errors = response.json::<VaultErrors>().await.map(|e| e.errors).unwrap_or_default();
            return Err(BackendError::auth(
                BackendKind::Vault,
                format!("AppRole login returned {status}: {}", errors.join("; ")),
            ));
        }

        let body: AppRoleLoginResponse = response
            .json()
            .await
            .map_err(|e| BackendError::auth(BackendKind::Vault, e.to_string()))?;

        debug!(lease_secs = body.auth.lease_duration, "Vault AppRole login succeeded");
        let token = Zeroizing::new(body.auth.client_token);
        // Renew slightly early; a zero lease means the token does not expire
        let expires_at = (body.auth.lease_duration > 0).then(|| {
            Instant::now() + Duration::from_secs(body.auth.lease_duration.saturating_sub(10).max(1))
        });
        *login = Some(LoginToken {
            token: token.clone(),
            expires_at,
        });
        Ok(token)
    }

    async fn forget_login(&self) {
        *self.login.lock().await = None;
    }

    async fn read(&self, path: &str) -> Result<reqwest::Response, BackendError> {
        let token = self.token().await?;
        let url = format!("{}/v1/{}", self.addr, path.trim_start_matches('/'));
        self.http_client
            .get(&url)
            .header("X-Vault-Token", token.as_str())
            .send()
            .await
            .map_err(|e| BackendError::request(BackendKind::Vault, path, e.to_string()))
    }
}

/// Unwrap the KV v2 envelope if present
fn kv_data(
    mut data: serde_json::Map<String, serde_json::Value>,
) -> serde_json::Map<String, serde_json::Value> {
    let is_v2 = data.contains_key("metadata")
        && matches!(data.get("data"), Some(serde_json::Value::Object(_)));
    if is_v2 {
        if let Some(serde_json::Value::Object(inner)) = data.remove("data") {
            return inner;
        }
    }
    data
}

#[async_trait]
impl SecretFetcher for VaultFetcher {
    fn kind(&self) -> BackendKind {
        BackendKind::Vault
    }

    async fn fetch(&self, name: &str) -> Result<String, BackendError> {
        let mut response = self.read(name).await?;

        if response.status() == StatusCode::FORBIDDEN && matches!(self.auth, VaultAuth::AppRole { .. }) {
            warn!(vault.path = name, "Vault returned 403, re-authenticating with AppRole");
            self.forget_login().await;
            response = self.read(name).await?;
        }

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(BackendError::NotFound {
                backend: BackendKind::Vault,
                name: name.to_string(),
            });
        }
        if !status.is_success() {
            let errors = response.json::<VaultErrors>().await.map(|e| e.errors).unwrap_or_default();
            return Err(BackendError::request(
                BackendKind::Vault,
                name,
                format!("HTTP {status}: {}", errors.join("; ")),
            ));
        }

        let body: ReadResponse = response
            .json()
            .await
            .map_err(|e| BackendError::request(BackendKind::Vault, name, e.to_string()))?;

        let data = body.data.ok_or_else(|| BackendError::NotFound {
            backend: BackendKind::Vault,
            name: name.to_string(),
        })?;

        serde_json::to_string(&kv_data(data))
            .map_err(|e| BackendError::request(BackendKind::Vault, name, e.to_string()))
    }
}

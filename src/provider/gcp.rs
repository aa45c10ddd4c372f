//! # GCP Secret Manager
//!
//! Native REST client for GCP Secret Manager API v1. Only the `latest` version
//! of a secret is ever read.
//!
//! Access tokens come from one of:
//! - a service-account JSON key from the profile, exchanged through a signed
//!   RS256 JWT assertion
//! - the GCE/GKE metadata server (Workload Identity)
//!
//! References:
//! - [Access secret version](https://cloud.google.com/secret-manager/docs/reference/rest/v1/projects.secrets.versions/access)
//! - [OAuth 2.0 for service accounts](https://developers.google.com/identity/protocols/oauth2/service-account#httprest)

use super::{BackendError, BackendKind, SecretFetcher};
use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info};

pub const DEFAULT_BASE_URL: &str = "https://secretmanager.googleapis.com";
const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";
const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Refresh tokens this long before they expire
const TOKEN_EXPIRY_SLACK: Duration = Duration::from_secs(60);

/// Subset of a service-account JSON key file
#[derive(Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default)]
    pub token_uri: Option<String>,
}

impl std::fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Serialize)]
struct JwtClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: u64,
    exp: u64,
}

/// OAuth2 access token response (metadata server and token endpoint share the shape)
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct AccessSecretVersionResponse {
    payload: SecretPayload,
}

#[derive(Debug, Deserialize)]
struct SecretPayload {
    /// Base64-encoded secret data
    data: String,
}

#[derive(Debug, Deserialize)]
struct GcpErrorResponse {
    error: GcpError,
}

#[derive(Debug, Deserialize)]
struct GcpError {
    code: u16,
    message: String,
    #[serde(default)]
    status: String,
}

/// Where access tokens come from
#[derive(Debug)]
pub enum TokenSource {
    Metadata,
    ServiceAccount(ServiceAccountKey),
    /// Fixed bearer token, used against local mocks
    Static(String),
}

struct CachedToken {
    token: String,
    expires_at: Instant,
}

/// GCP Secret Manager fetcher
pub struct GcpSecretManagerFetcher {
    http_client: Client,
    base_url: String,
    project: String,
    token_source: TokenSource,
    token: Mutex<Option<CachedToken>>,
}

impl std::fmt::Debug for GcpSecretManagerFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GcpSecretManagerFetcher")
            .field("base_url", &self.base_url)
            .field("project", &self.project)
            .field("token_source", &self.token_source)
            .finish_non_exhaustive()
    }
}

impl GcpSecretManagerFetcher {
    /// Build a fetcher for `project`. A credentials JSON selects service-account auth.
    pub fn new(project: &str, credentials_json: Option<&str>) -> Result<Self, BackendError> {
        let token_source = match credentials_json.filter(|c| !c.trim().is_empty()) {
            Some(json) => {
                let key: ServiceAccountKey = serde_json::from_str(json).map_err(|e| {
                    BackendError::config(
                        BackendKind::Gcp,
                        format!("invalid service account credentials: {e}"),
                    )
                })?;
                info!(gcp.client_email = %key.client_email, "Using GCP service account credentials");
                TokenSource::ServiceAccount(key)
            }
            None => {
                info!("Using GCP metadata server credentials (Workload Identity)");
                TokenSource::Metadata
            }
        };
        Self::with_endpoint(DEFAULT_BASE_URL, project, token_source)
    }

    pub fn with_endpoint(
        base_url: &str,
        project: &str,
        token_source: TokenSource,
    ) -> Result<Self, BackendError> {
        if project.is_empty() {
            return Err(BackendError::config(BackendKind::Gcp, "project is required"));
        }
        let http_client = Client::builder()
            .build()
            .map_err(|e| BackendError::config(BackendKind::Gcp, e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            project: project.to_string(),
            token_source,
            token: Mutex::new(None),
        })
    }

    async fn access_token(&self) -> Result<String, BackendError> {
        let service_account = match &self.token_source {
            TokenSource::Static(token) => return Ok(token.clone()),
            TokenSource::Metadata => None,
            TokenSource::ServiceAccount(key) => Some(key),
        };

        let mut cached = self.token.lock().await;
        if let Some(t) = cached.as_ref() {
            if Instant::now() + TOKEN_EXPIRY_SLACK < t.expires_at {
                return Ok(t.token.clone());
            }
        }

        let response = match service_account {
            Some(key) => self.service_account_token(key).await?,
            None => self.metadata_token().await?,
        };

        let lifetime = Duration::from_secs(response.expires_in.unwrap_or(3600));
        *cached = Some(CachedToken {
            token: response.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });
        Ok(response.access_token)
    }

    async fn metadata_token(&self) -> Result<TokenResponse, BackendError> {
        let response = self
            .http_client
            .get(METADATA_TOKEN_URL)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|e| BackendError::auth(BackendKind::Gcp, format!("metadata server: {e}")))?;

        if !response.status().is_success() {
            return Err(BackendError::auth(
                BackendKind::Gcp,
                format!("metadata server returned {}", response.status()),
            ));
        }

        debug!("Retrieved access token from metadata server");
        response
            .json()
            .await
            .map_err(|e| BackendError::auth(BackendKind::Gcp, e.to_string()))
    }

    async fn service_account_token(
        &self,
        key: &ServiceAccountKey,
    ) -> Result<TokenResponse, BackendError> {
        let token_uri = key.token_uri.as_deref().unwrap_or(DEFAULT_TOKEN_URI);
        let assertion = sign_assertion(key, token_uri, chrono::Utc::now().timestamp())?;

        let response = self
            .http_client
            .post(token_uri)
            .form(&[("grant_type", JWT_GRANT_TYPE), ("assertion", assertion.as_str())])
            .send()
            .await
            .map_err(|e| BackendError::auth(BackendKind::Gcp, e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::auth(
                BackendKind::Gcp,
                format!("token exchange returned {status}: {body}"),
            ));
        }

        debug!(gcp.client_email = %key.client_email, "Exchanged service account assertion for access token");
        response
            .json()
            .await
            .map_err(|e| BackendError::auth(BackendKind::Gcp, e.to_string()))
    }
}

/// Build the signed JWT assertion for the OAuth2 JWT-bearer grant
pub(crate) fn sign_assertion(
    key: &ServiceAccountKey,
    token_uri: &str,
    now: i64,
) -> Result<String, BackendError> {
    let iat = u64::try_from(now).unwrap_or_default();
    let claims = JwtClaims {
        iss: &key.client_email,
        scope: CLOUD_PLATFORM_SCOPE,
        aud: token_uri,
        iat,
        exp: iat + 3600,
    };
    let encoding_key = jsonwebtoken::EncodingKey::from_rsa_pem(key.private_key.as_bytes())
        .map_err(|e| BackendError::config(BackendKind::Gcp, format!("invalid private key: {e}")))?;

    jsonwebtoken::encode(
        &jsonwebtoken::Header::new(jsonwebtoken::Algorithm::RS256),
        &claims,
        &encoding_key,
    )
    .map_err(|e| BackendError::auth(BackendKind::Gcp, e.to_string()))
}

#[async_trait]
impl SecretFetcher for GcpSecretManagerFetcher {
    fn kind(&self) -> BackendKind {
        BackendKind::Gcp
    }

    async fn fetch(&self, name: &str) -> Result<String, BackendError> {
        let token = self.access_token().await?;
        let url = format!(
            "{}/v1/projects/{}/secrets/{}/versions/latest:access",
            self.base_url, self.project, name
        );

        let response = self
            .http_client
            .get(&url)
            .bearer_auth(token)
            .header("Content-Type", "application/json")
            .send()
            .await
            .map_err(|e| BackendError::request(BackendKind::Gcp, name, e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(BackendError::NotFound {
                backend: BackendKind::Gcp,
                name: name.to_string(),
            });
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = match serde_json::from_str::<GcpErrorResponse>(&body) {
                Ok(err) => format!(
                    "GCP API error: {} (code: {}, status: {})",
                    err.error.message, err.error.code, err.error.status
                ),
                Err(_) => format!("HTTP {status}: {body}"),
            };
            return Err(BackendError::request(BackendKind::Gcp, name, message));
        }

        let access: AccessSecretVersionResponse = response
            .json()
            .await
            .map_err(|e| BackendError::request(BackendKind::Gcp, name, e.to_string()))?;

        let decoded = general_purpose::STANDARD
            .decode(access.payload.data.as_bytes())
            .map_err(|e| BackendError::request(BackendKind::Gcp, name, e.to_string()))?;

        String::from_utf8(decoded).map_err(|e| {
            BackendError::request(BackendKind::Gcp, name, format!("payload is not UTF-8: {e}"))
        })
    }
}

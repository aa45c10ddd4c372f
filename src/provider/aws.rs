//! # AWS Secrets Manager
//!
//! Reads `SecretString` (or UTF-8 `SecretBinary`) values. With an access key
//! pair on the profile the client uses static credentials, otherwise the SDK
//! default chain (IRSA, instance profile, environment).

use super::{BackendError, BackendKind, SecretFetcher};
use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_secretsmanager::Client as SecretsManagerClient;
use tracing::{debug, info};

/// AWS Secrets Manager fetcher
pub struct AwsSecretsManagerFetcher {
    client: SecretsManagerClient,
    region: Option<String>,
}

impl std::fmt::Debug for AwsSecretsManagerFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsSecretsManagerFetcher")
            .field("region", &self.region)
            .finish_non_exhaustive()
    }
}

/// Connection settings after profile and operator defaults are merged
#[derive(Default)]
pub struct AwsSettings<'a> {
    pub region: Option<&'a str>,
    pub access_key_id: Option<&'a str>,
    pub secret_access_key: Option<&'a str>,
    /// Override for the service endpoint, used against local mocks
    pub endpoint_url: Option<&'a str>,
}

impl AwsSecretsManagerFetcher {
    pub async fn new(settings: &AwsSettings<'_>) -> Self {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());

        if let Some(region) = settings.region.filter(|r| !r.is_empty()) {
            loader = loader.region(aws_config::Region::new(region.to_string()));
        }

        match (settings.access_key_id, settings.secret_access_key) {
            (Some(id), Some(secret)) if !id.is_empty() && !secret.is_empty() => {
                info!("Using static AWS access key credentials");
                loader = loader.credentials_provider(Credentials::new(
                    id,
                    secret,
                    None,
                    None,
                    "dockhand-profile",
                ));
            }
            _ => {
                debug!("Using AWS default credential chain");
            }
        }

        if let Some(endpoint) = settings.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }

        let sdk_config = loader.load().await;

        Self {
            client: SecretsManagerClient::new(&sdk_config),
            region: settings.region.map(ToString::to_string),
        }
    }
}

#[async_trait]
impl SecretFetcher for AwsSecretsManagerFetcher {
    fn kind(&self) -> BackendKind {
        BackendKind::Aws
    }

    async fn fetch(&self, name: &str) -> Result<String, BackendError> {
        let response = self
            .client
            .get_secret_value()
            .secret_id(name)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error()
                    .is_some_and(|se| se.is_resource_not_found_exception())
                {
                    BackendError::NotFound {
                        backend: BackendKind::Aws,
                        name: name.to_string(),
                    }
                } else {
                    BackendError::request(
                        BackendKind::Aws,
                        name,
                        aws_sdk_secretsmanager::error::DisplayErrorContext(&e).to_string(),
                    )
                }
            })?;

        response
            .secret_string()
            .map(ToString::to_string)
            .or_else(|| {
                response
                    .secret_binary()
                    .and_then(|blob| String::from_utf8(blob.as_ref().to_vec()).ok())
            })
            .ok_or_else(|| {
                BackendError::request(
                    BackendKind::Aws,
                    name,
                    "secret has no string or UTF-8 binary value",
                )
            })
    }
}

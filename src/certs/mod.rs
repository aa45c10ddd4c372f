//! # Certificates
//!
//! Keeps the admission webhook's serving certificate valid.
//!
//! One replica at a time (elected through a Lease) owns the
//! `<service>-tls` Secret: it issues a self-signed CA and leaf when the Secret
//! is missing, unreadable or close to expiry, and keeps the CA bundle on the
//! `MutatingWebhookConfiguration` in step with the Secret.

pub mod leader;
pub mod pki;

pub use leader::{LeaderElectionError, LeaderElector, LeaderGuard, while_leader};
pub use pki::{CertificateBundle, CertificateInfo, PkiError, generate_bundle, needs_renewal};

use crate::config::CertManagerConfig;
use crate::observability::metrics;
use k8s_openapi::ByteString;
use k8s_openapi::api::admissionregistration::v1::MutatingWebhookConfiguration;
use k8s_openapi::api::core::v1::Secret;
use kube::api::{ObjectMeta, PostParams};
use kube::{Api, Client};
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const TLS_CERT_KEY: &str = "tls.crt";
pub const TLS_KEY_KEY: &str = "tls.key";
pub const CA_CERT_KEY: &str = "ca.crt";

#[derive(Debug, Error)]
pub enum CertManagerError {
    #[error(transparent)]
    Pki(#[from] PkiError),

    #[error("kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("secret {0} has no {1} key")]
    MissingKey(String, &'static str),
}

/// Name of the Secret holding the webhook serving certificate
#[must_use]
pub fn tls_secret_name(service: &str) -> String {
    format!("{service}-tls")
}

/// Name of the Lease guarding certificate issuance
#[must_use]
pub fn lease_name(service: &str) -> String {
    format!("{service}-cert-manager")
}

/// PEM value stored under `key`, if present and UTF-8
#[must_use]
pub fn secret_pem<'a>(secret: &'a Secret, key: &str) -> Option<&'a str> {
    secret
        .data
        .as_ref()?
        .get(key)
        .and_then(|v| std::str::from_utf8(&v.0).ok())
}

/// Whether the stored bundle must be replaced at unix time `now`
#[must_use]
pub fn secret_needs_rotation(secret: Option<&Secret>, threshold_days: i64, now: i64) -> bool {
    let Some(secret) = secret else {
        return true;
    };
    let (Some(cert), Some(_), Some(_)) = (
        secret_pem(secret, TLS_CERT_KEY),
        secret_pem(secret, TLS_KEY_KEY),
        secret_pem(secret, CA_CERT_KEY),
    ) else {
        return true;
    };
    needs_renewal(cert, threshold_days, now)
}

/// Build the `kubernetes.io/tls` Secret for `bundle`, keeping `existing` metadata
#[must_use]
pub fn tls_secret(existing: Option<Secret>, name: &str, namespace: &str, bundle: &CertificateBundle) -> Secret {
    let mut secret = existing.unwrap_or_else(|| Secret {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        ..Default::default()
    });
    secret.type_ = Some("kubernetes.io/tls".to_string());
    secret.string_data = None;
    secret.data = Some(BTreeMap::from([
        (TLS_CERT_KEY.to_string(), ByteString(bundle.cert_pem.as_bytes().to_vec())),
        (TLS_KEY_KEY.to_string(), ByteString(bundle.key_pem.as_bytes().to_vec())),
        (CA_CERT_KEY.to_string(), ByteString(bundle.ca_cert_pem.as_bytes().to_vec())),
    ]));
    secret
}

/// Point every webhook at `ca_pem`. Returns whether anything changed.
pub fn apply_ca_bundle(config: &mut MutatingWebhookConfiguration, ca_pem: &[u8]) -> bool {
    let mut changed = false;
    for webhook in config.webhooks.iter_mut().flatten() {
        let current = webhook.client_config.ca_bundle.as_ref().map(|b| b.0.as_slice());
        if current != Some(ca_pem) {
            webhook.client_config.ca_bundle = Some(ByteString(ca_pem.to_vec()));
            changed = true;
        }
    }
    changed
}

/// Leader-elected webhook certificate lifecycle
pub struct CertificateManager {
    client: Client,
    config: CertManagerConfig,
    service_name: String,
    namespace: String,
    webhook_id: String,
    identity: String,
}

impl std::fmt::Debug for CertificateManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateManager")
            .field("service_name", &self.service_name)
            .field("namespace", &self.namespace)
            .field("webhook_id", &self.webhook_id)
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

impl CertificateManager {
    #[must_use]
    pub fn new(
        client: Client,
        config: CertManagerConfig,
        service_name: &str,
        namespace: &str,
        webhook_id: &str,
        identity: &str,
    ) -> Self {
        Self {
            client,
            config,
            service_name: service_name.to_string(),
            namespace: namespace.to_string(),
            webhook_id: webhook_id.to_string(),
            identity: identity.to_string(),
        }
    }

    /// Run forever: win the lease, keep certificates fresh, start over on loss
    pub async fn run(self) {
        let elector = Arc::new(LeaderElector::new(
            self.client.clone(),
            &lease_name(&self.service_name),
            &self.namespace,
            &self.identity,
            &self.config,
        ));

        loop {
            let mut guard = Arc::clone(&elector).acquire().await;
            let this = &self;
            while_leader(&mut guard, self.config.check_interval, move || async move {
                if let Err(e) = this.ensure().await {
                    warn!(error = %e, "Certificate check failed");
                }
            })
            .await;
            warn!(identity = %self.identity, "Certificate manager lost leadership");
        }
    }

    /// One pass: rotate the TLS Secret if needed, then sync the CA bundle
    pub async fn ensure(&self) -> Result<(), CertManagerError> {
        let ca_pem = self.ensure_tls_secret().await?;
        self.ensure_ca_bundle(ca_pem.as_bytes()).await
    }

    async fn ensure_tls_secret(&self) -> Result<String, CertManagerError> {
        let name = tls_secret_name(&self.service_name);
        let api: Api<Secret> = Api::namespaced(self.client.clone(), &self.namespace);
        let existing = api.get_opt(&name).await?;
        let now = ::time::OffsetDateTime::now_utc().unix_timestamp();

        if !secret_needs_rotation(existing.as_ref(), self.config.renewal_threshold_days, now) {
            debug!(secret = %name, "Webhook certificate still valid");
            let secret = existing.as_ref().ok_or_else(|| CertManagerError::MissingKey(name.clone(), CA_CERT_KEY))?;
            return secret_pem(secret, CA_CERT_KEY)
                .map(str::to_string)
                .ok_or(CertManagerError::MissingKey(name, CA_CERT_KEY));
        }

        info!(secret = %name, namespace = %self.namespace, "Issuing webhook certificate");
        let bundle = generate_bundle(
            &self.service_name,
            &self.namespace,
            self.config.ca_validity_days,
            self.config.cert_validity_days,
        )?;

        let creating = existing.is_none();
        let secret = tls_secret(existing, &name, &self.namespace, &bundle);
        if creating {
            api.create(&PostParams::default(), &secret).await?;
        } else {
            api.replace(&name, &PostParams::default(), &secret).await?;
        }
        metrics::increment_certificate_rotations();
        info!(secret = %name, "Webhook certificate stored");
        Ok(bundle.ca_cert_pem)
    }

    async fn ensure_ca_bundle(&self, ca_pem: &[u8]) -> Result<(), CertManagerError> {
        let api: Api<MutatingWebhookConfiguration> = Api::all(self.client.clone());
        let Some(mut config) = api.get_opt(&self.webhook_id).await? else {
            warn!(webhook = %self.webhook_id, "MutatingWebhookConfiguration not found, skipping CA bundle");
            return Ok(());
        };

        if !apply_ca_bundle(&mut config, ca_pem) {
            debug!(webhook = %self.webhook_id, "CA bundle already current");
            return Ok(());
        }
        api.replace(&self.webhook_id, &PostParams::default(), &config).await?;
        info!(webhook = %self.webhook_id, "Updated webhook CA bundle");
        Ok(())
    }
}

//! # Admission Webhook
//!
//! HTTPS server for `POST /mutate`.
//!
//! TLS material comes either from the certificate manager's `<name>-tls`
//! Secret (self-signed mode, reloaded every minute so rotations are picked up
//! without a restart) or from PEM files on disk.

pub mod mutate;

pub use mutate::{WebhookError, WebhookState, mutate_handler};

use crate::certs::{self, CertificateManager, TLS_CERT_KEY, TLS_KEY_KEY};
use crate::config::CertManagerConfig;
use anyhow::{Context, Result};
use axum::{Router, routing::post};
use axum_server::tls_rustls::RustlsConfig;
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

/// How often the self-signed certificate is re-read from its Secret
const TLS_RELOAD_INTERVAL: Duration = Duration::from_secs(60);

/// How often to poll for the certificate Secret on first start
const TLS_WAIT_INTERVAL: Duration = Duration::from_secs(2);

/// Build the admission router
pub fn router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/mutate", post(mutate_handler))
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()))
        .with_state(state)
}

/// Settings for the `server` subcommand
#[derive(Debug, Clone)]
pub struct WebhookServerConfig {
    /// Service name; also names the TLS Secret and the Lease
    pub name: String,
    pub namespace: String,
    pub port: u16,
    pub cert_path: PathBuf,
    pub key_path: PathBuf,
    pub self_sign_certs: bool,
    /// Name of the MutatingWebhookConfiguration to keep the CA bundle on
    pub webhook_id: String,
    /// Lease holder identity
    pub identity: String,
}

/// Read `tls.crt`/`tls.key` from the certificate Secret, if it is populated yet
pub async fn read_tls_secret(api: &Api<Secret>, name: &str) -> Result<Option<(Vec<u8>, Vec<u8>)>> {
    let Some(secret) = api.get_opt(name).await? else {
        return Ok(None);
    };
    Ok(
        certs::secret_pem(&secret, TLS_CERT_KEY)
            .zip(certs::secret_pem(&secret, TLS_KEY_KEY))
            .map(|(cert, key)| (cert.as_bytes().to_vec(), key.as_bytes().to_vec())),
    )
}

async fn wait_for_tls_secret(api: &Api<Secret>, name: &str) -> Result<(Vec<u8>, Vec<u8>)> {
    loop {
        match read_tls_secret(api, name).await {
            Ok(Some(pair)) => return Ok(pair),
            Ok(None) => debug!(secret = %name, "Waiting for webhook certificate"),
            Err(e) => warn!(secret = %name, error = %e, "Unable to read webhook certificate"),
        }
        tokio::time::sleep(TLS_WAIT_INTERVAL).await;
    }
}

fn spawn_tls_reload(api: Api<Secret>, name: String, tls: RustlsConfig) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(TLS_RELOAD_INTERVAL);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match read_tls_secret(&api, &name).await {
                Ok(Some((cert, key))) => match tls.reload_from_pem(cert, key).await {
                    Ok(()) => debug!(secret = %name, "Reloaded webhook certificate"),
                    Err(e) => warn!(secret = %name, error = %e, "Unable to reload webhook certificate"),
                },
                Ok(None) => warn!(secret = %name, "Webhook certificate Secret missing, keeping current"),
                Err(e) => warn!(secret = %name, error = %e, "Unable to read webhook certificate"),
            }
        }
    });
}

async fn tls_config(client: &Client, config: &WebhookServerConfig, cert_manager: CertManagerConfig) -> Result<RustlsConfig> {
    if !config.self_sign_certs {
        info!(cert = %config.cert_path.display(), key = %config.key_path.display(), "Loading webhook certificate from files");
        return RustlsConfig::from_pem_file(&config.cert_path, &config.key_path)
            .await
            .context("Failed to load webhook TLS files");
    }

    let manager = CertificateManager::new(
        client.clone(),
        cert_manager,
        &config.name,
        &config.namespace,
        &config.webhook_id,
        &config.identity,
    );
    tokio::spawn(manager.run());

    let secret_name = certs::tls_secret_name(&config.name);
    let api: Api<Secret> = Api::namespaced(client.clone(), &config.namespace);
    let (cert, key) = wait_for_tls_secret(&api, &secret_name).await?;
    let tls = RustlsConfig::from_pem(cert, key)
        .await
        .context("Failed to build webhook TLS config")?;
    spawn_tls_reload(api, secret_name, tls.clone());
    Ok(tls)
}

/// Serve the admission webhook until the process exits
pub async fn serve(
    client: Client,
    config: WebhookServerConfig,
    cert_manager: CertManagerConfig,
    state: Arc<WebhookState>,
) -> Result<()> {
    let tls = tls_config(&client, &config, cert_manager).await?;
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));

    info!(port = config.port, name = %config.name, "Admission webhook listening on {}", addr);
    axum_server::bind_rustls(addr, tls)
        .serve(router(state).into_make_service())
        .await
        .context("Admission webhook server failed")
}

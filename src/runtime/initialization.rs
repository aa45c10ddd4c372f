//! # Initialization
//!
//! Process setup shared by both subcommands (rustls provider, tracing,
//! metrics, the probe server, the Kubernetes client) and the assembly of the
//! controller's reconciler context.

use crate::config::{BackendDefaults, ControllerConfig};
use crate::constants::{
    DEFAULT_SERVER_POLL_INTERVAL_MS, DEFAULT_SERVER_STARTUP_TIMEOUT_SECS, EVENT_REPORTER,
};
use crate::controller::reconciler::{
    KubeEventPublisher, ProfileResolver, ReconcileOptions, Reconciler,
};
use crate::controller::server::{ServerState, start_server};
use crate::crd::DockhandSecret;
use crate::observability;
use crate::propagation::{KubeSecretLookup, SecretLookup};
use crate::provider::{FetcherRegistry, KubeSecretRefResolver};
use anyhow::{Context, Result};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Api, Client, Config};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{error, info};

/// Install ring as the process-wide rustls provider
///
/// Must run before any TLS client or server is built. A second call is a no-op.
pub fn install_crypto_provider() {
    if rustls::crypto::ring::default_provider().install_default().is_err() {
        tracing::debug!("rustls crypto provider already installed");
    }
}

/// Filter used when `RUST_LOG` is unset
#[must_use]
pub fn default_log_filter(debug: bool) -> &'static str {
    if debug {
        "dockhand_secrets_operator=debug"
    } else {
        "dockhand_secrets_operator=info"
    }
}

/// Set up the fmt subscriber; `RUST_LOG` wins over `--debug`
pub fn init_tracing(debug: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_log_filter(debug).into());
    if let Err(e) = tracing_subscriber::fmt().with_env_filter(filter).try_init() {
        eprintln!("tracing subscriber already initialized: {e}");
    }
}

/// Log the build metadata stamped in by build.rs
pub fn log_build_info(component: &str) {
    info!(component, "Starting dockhand-secrets-operator");
    info!(
        "Build info: timestamp={}, datetime={}, git_hash={}",
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_DATETIME"),
        env!("BUILD_GIT_HASH")
    );
}

/// Register metrics and start the probe server, returning once it is bound
pub async fn start_probe_server(port: u16) -> Result<Arc<ServerState>> {
    observability::metrics::register_metrics()?;

    let server_state = Arc::new(ServerState::new());
    let state = Arc::clone(&server_state);
    let server_handle = tokio::spawn(async move {
        if let Err(e) = start_server(port, state).await {
            error!("HTTP server error: {}", e);
        }
    });

    wait_for_server_ready(&server_state, &server_handle).await?;
    Ok(server_state)
}

/// Wait for the HTTP server to become ready
async fn wait_for_server_ready(
    server_state: &ServerState,
    server_handle: &tokio::task::JoinHandle<()>,
) -> Result<()> {
    let startup_timeout = Duration::from_secs(DEFAULT_SERVER_STARTUP_TIMEOUT_SECS);
    let poll_interval = Duration::from_millis(DEFAULT_SERVER_POLL_INTERVAL_MS);
    let start_time = Instant::now();

    loop {
        if server_handle.is_finished() {
            return Err(anyhow::anyhow!("HTTP server failed to start"));
        }
        if server_state.ready() {
            info!("HTTP server is ready and accepting connections");
            return Ok(());
        }
        if start_time.elapsed() > startup_timeout {
            return Err(anyhow::anyhow!(
                "HTTP server failed to become ready within {} seconds",
                startup_timeout.as_secs()
            ));
        }
        tokio::time::sleep(poll_interval).await;
    }
}

/// Build a client from `kubeconfig` when given, otherwise the usual inference
pub async fn kube_client(kubeconfig: Option<&PathBuf>) -> Result<Client> {
    let Some(path) = kubeconfig else {
        return Client::try_default()
            .await
            .context("Failed to create Kubernetes client");
    };
    let kubeconfig = Kubeconfig::read_from(path)
        .with_context(|| format!("Failed to read kubeconfig {}", path.display()))?;
    let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .context("Invalid kubeconfig")?;
    Client::try_from(config).context("Failed to create Kubernetes client")
}

/// Options for the `controller` subcommand
#[derive(Debug, Clone, Default)]
pub struct ControllerSettings {
    pub kubeconfig: Option<PathBuf>,
    /// Namespace the operator runs in
    pub namespace: Option<String>,
    /// Watch only this namespace; all namespaces when unset
    pub watch_namespace: Option<String>,
    pub options: ReconcileOptions,
    pub defaults: BackendDefaults,
    pub metrics_port: Option<u16>,
}

impl ControllerSettings {
    /// Namespace the watches are scoped to, `None` for the whole cluster
    #[must_use]
    pub fn watch_scope(&self) -> Option<&str> {
        self.watch_namespace.as_deref().filter(|ns| !ns.is_empty())
    }

    /// Apply the command line overrides on top of `config`
    #[must_use]
    pub fn controller_config(&self, mut config: ControllerConfig) -> ControllerConfig {
        if let Some(port) = self.metrics_port {
            config.metrics_port = port;
        }
        if let Some(ns) = self.namespace.as_deref().filter(|ns| !ns.is_empty()) {
            config.operator_namespace = ns.to_string();
        }
        config
    }
}

/// Everything the watch loop needs
pub struct InitializationResult {
    pub client: Client,
    pub secrets: Api<DockhandSecret>,
    pub reconciler: Arc<Reconciler>,
    pub server_state: Arc<ServerState>,
    pub watch_namespace: Option<String>,
}

impl std::fmt::Debug for InitializationResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InitializationResult")
            .field("server_ready", &self.server_state.ready())
            .field("watch_namespace", &self.watch_namespace)
            .finish_non_exhaustive()
    }
}

/// Initialize the controller runtime
///
/// Starts the probe server first so liveness passes while the client and
/// caches come up.
pub async fn initialize(settings: ControllerSettings) -> Result<InitializationResult> {
    log_build_info("controller");

    let config = settings.controller_config(ControllerConfig::from_env());
    let server_state = start_probe_server(config.metrics_port).await?;

    let client = kube_client(settings.kubeconfig.as_ref()).await?;
    let watch_namespace = settings.watch_scope().map(str::to_string);
    let secrets: Api<DockhandSecret> = match watch_namespace.as_deref() {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    };

    let registry = Arc::new(FetcherRegistry::new(
        Arc::new(KubeSecretRefResolver::new(client.clone())),
        settings.defaults,
    ));
    let profiles = ProfileResolver::spawn(client.clone(), watch_namespace.as_deref(), Arc::clone(&registry));
    let secret_lookup: Arc<dyn SecretLookup> = Arc::new(KubeSecretLookup::new(client.clone()));

    info!(
        operator_namespace = %config.operator_namespace,
        watch_namespace = watch_namespace.as_deref().unwrap_or("<all>"),
        allow_cross_namespace = settings.options.allow_cross_namespace,
        delimiters = ?settings.options.delimiters,
        "Controller initialized, starting watch loop..."
    );

    let reconciler = Arc::new(Reconciler {
        client: client.clone(),
        config,
        options: settings.options,
        profiles,
        registry,
        events: Arc::new(KubeEventPublisher::new(client.clone(), EVENT_REPORTER)),
        secret_lookup,
        backoff_states: Arc::new(Mutex::new(HashMap::new())),
    });

    Ok(InitializationResult {
        client,
        secrets,
        reconciler,
        server_state,
        watch_namespace,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_log_filter() {
        assert_eq!(default_log_filter(false), "dockhand_secrets_operator=info");
        assert_eq!(default_log_filter(true), "dockhand_secrets_operator=debug");
    }

    #[test]
    fn test_operator_namespace_is_not_a_watch_scope() {
        let settings = ControllerSettings {
            namespace: Some("dockhand".to_string()),
            metrics_port: Some(9100),
            ..Default::default()
        };
        assert_eq!(settings.watch_scope(), None);

        let config = settings.controller_config(ControllerConfig::default());
        assert_eq!(config.operator_namespace, "dockhand");
        assert_eq!(config.metrics_port, 9100);
    }

    #[test]
    fn test_empty_watch_namespace_means_all() {
        let settings = ControllerSettings {
            watch_namespace: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(settings.watch_scope(), None);
        assert_eq!(
            settings.controller_config(ControllerConfig::default()).operator_namespace,
            ControllerConfig::default().operator_namespace
        );
    }

    #[test]
    fn test_install_crypto_provider_twice() {
        install_crypto_provider();
        install_crypto_provider();
    }
}

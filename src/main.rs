//! # Dockhand Secrets Operator
//!
//! Kubernetes operator that renders `Secret` objects from templated
//! DockhandSecrets and keeps dependent workloads rolling when their data
//! changes.
//!
//! ## Subcommands
//!
//! - `controller` (alias `operator`): reconciles DockhandSecrets
//! - `server`: serves the mutating admission webhook, optionally managing its
//!   own self-signed certificate
//!
//! Every flag can also be set through `DOCKHAND_SECRETS_OPERATOR_<FLAG>`.
//! Backend flags additionally fall back to their conventional variables
//! (`AWS_REGION`, `VAULT_ADDR`, `AZURE_TENANT_ID`, ...).

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use dockhand_secrets_operator::config::{BackendDefaults, CertManagerConfig};
use dockhand_secrets_operator::constants::{
    DEFAULT_METRICS_PORT, DEFAULT_OPERATOR_NAMESPACE, DEFAULT_WEBHOOK_NAME, DEFAULT_WEBHOOK_PORT,
};
use dockhand_secrets_operator::controller::reconciler::ReconcileOptions;
use dockhand_secrets_operator::propagation::KubeSecretLookup;
use dockhand_secrets_operator::runtime::initialization::{
    ControllerSettings, init_tracing, initialize, install_crypto_provider, kube_client,
    log_build_info, start_probe_server,
};
use dockhand_secrets_operator::runtime::watch_loop::run_watch_loop;
use dockhand_secrets_operator::template::Delimiters;
use dockhand_secrets_operator::webhook::{self, WebhookServerConfig, WebhookState};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "dockhand-secrets-operator", version, about = "Dockhand Secrets Operator")]
struct Cli {
    /// Enable debug logging (overridden by RUST_LOG)
    #[arg(long, global = true, env = "DOCKHAND_SECRETS_OPERATOR_DEBUG")]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile DockhandSecrets into Kubernetes Secrets
    #[command(alias = "operator")]
    Controller(Box<ControllerArgs>),
    /// Serve the mutating admission webhook
    Server(ServerArgs),
}

#[derive(Args)]
struct ControllerArgs {
    /// Path to a kubeconfig; in-cluster configuration when unset
    #[arg(long, env = "DOCKHAND_SECRETS_OPERATOR_KUBECONFIG")]
    kubeconfig: Option<PathBuf>,

    /// Namespace the operator is deployed in; `POD_NAMESPACE` when unset
    #[arg(long, env = "DOCKHAND_SECRETS_OPERATOR_NAMESPACE")]
    namespace: Option<String>,

    /// Only watch this namespace; all namespaces when unset
    #[arg(long, env = "DOCKHAND_SECRETS_OPERATOR_WATCH_NAMESPACE")]
    watch_namespace: Option<String>,

    /// Allow DockhandSecrets to reference Profiles in other namespaces
    #[arg(long, env = "DOCKHAND_SECRETS_OPERATOR_ALLOW_CROSS_NAMESPACE")]
    allow_cross_namespace: bool,

    #[arg(long, env = "DOCKHAND_SECRETS_OPERATOR_AWS_REGION")]
    aws_region: Option<String>,

    #[arg(long, env = "DOCKHAND_SECRETS_OPERATOR_AWS_ACCESS_KEY_ID")]
    aws_access_key_id: Option<String>,

    #[arg(long, env = "DOCKHAND_SECRETS_OPERATOR_AWS_SECRET_ACCESS_KEY", hide_env_values = true)]
    aws_secret_access_key: Option<String>,

    #[arg(long, env = "DOCKHAND_SECRETS_OPERATOR_AZURE_TENANT")]
    azure_tenant: Option<String>,

    #[arg(long, env = "DOCKHAND_SECRETS_OPERATOR_AZURE_CLIENT_ID")]
    azure_client_id: Option<String>,

    #[arg(long, env = "DOCKHAND_SECRETS_OPERATOR_AZURE_CLIENT_SECRET", hide_env_values = true)]
    azure_client_secret: Option<String>,

    #[arg(long, env = "DOCKHAND_SECRETS_OPERATOR_VAULT_ADDR")]
    vault_addr: Option<String>,

    #[arg(long, env = "DOCKHAND_SECRETS_OPERATOR_VAULT_TOKEN", hide_env_values = true)]
    vault_token: Option<String>,

    #[arg(long, env = "DOCKHAND_SECRETS_OPERATOR_VAULT_ROLE_ID")]
    vault_role_id: Option<String>,

    #[arg(long, env = "DOCKHAND_SECRETS_OPERATOR_VAULT_SECRET_ID", hide_env_values = true)]
    vault_secret_id: Option<String>,

    /// Template action delimiters as `left,right`. Defaults to `<<,>>`
    #[arg(long, env = "DOCKHAND_SECRETS_OPERATOR_TEMPLATE_DELIMS")]
    template_delims: Option<Delimiters>,

    #[arg(long, env = "DOCKHAND_SECRETS_OPERATOR_METRICS_PORT")]
    metrics_port: Option<u16>,
}

#[derive(Args)]
struct ServerArgs {
    /// Webhook Service name
    #[arg(long, env = "DOCKHAND_SECRETS_OPERATOR_NAME", default_value = DEFAULT_WEBHOOK_NAME)]
    name: String,

    #[arg(long, env = "DOCKHAND_SECRETS_OPERATOR_NAMESPACE", default_value = DEFAULT_OPERATOR_NAMESPACE)]
    namespace: String,

    #[arg(long, env = "DOCKHAND_SECRETS_OPERATOR_PORT", default_value_t = DEFAULT_WEBHOOK_PORT)]
    port: u16,

    #[arg(long, env = "DOCKHAND_SECRETS_OPERATOR_CERT", default_value = "/tls/server.crt")]
    cert: PathBuf,

    #[arg(long, env = "DOCKHAND_SECRETS_OPERATOR_KEY", default_value = "/tls/server.key")]
    key: PathBuf,

    /// Issue and rotate the serving certificate in-cluster instead of reading --cert/--key
    #[arg(
        long,
        env = "DOCKHAND_SECRETS_OPERATOR_SELF_SIGN_CERTS",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    self_sign_certs: bool,

    /// MutatingWebhookConfiguration to keep the CA bundle on; `<name>.dhs.dockhand.dev` when unset
    #[arg(long, env = "DOCKHAND_SECRETS_OPERATOR_WEBHOOK_ID")]
    webhook_id: Option<String>,

    #[arg(long, env = "DOCKHAND_SECRETS_OPERATOR_METRICS_PORT", default_value_t = DEFAULT_METRICS_PORT)]
    metrics_port: u16,
}

/// First non-empty value among the flag and the conventional variables
fn flag_or_env(flag: Option<String>, conventional: &[&str]) -> Option<String> {
    flag.filter(|v| !v.is_empty()).or_else(|| {
        conventional
            .iter()
            .find_map(|key| std::env::var(key).ok().filter(|v| !v.is_empty()))
    })
}

impl ControllerArgs {
    fn into_settings(self) -> ControllerSettings {
        let defaults = BackendDefaults {
            aws_region: flag_or_env(self.aws_region, &["AWS_REGION", "AWS_DEFAULT_REGION"]),
            aws_access_key_id: flag_or_env(self.aws_access_key_id, &["AWS_ACCESS_KEY_ID"]),
            aws_secret_access_key: flag_or_env(self.aws_secret_access_key, &["AWS_SECRET_ACCESS_KEY"]),
            azure_tenant: flag_or_env(self.azure_tenant, &["AZURE_TENANT_ID"]),
            azure_client_id: flag_or_env(self.azure_client_id, &["AZURE_CLIENT_ID"]),
            azure_client_secret: flag_or_env(self.azure_client_secret, &["AZURE_CLIENT_SECRET"]),
            vault_addr: flag_or_env(self.vault_addr, &["VAULT_ADDR"]),
            vault_token: flag_or_env(self.vault_token, &["VAULT_TOKEN"]),
            vault_role_id: flag_or_env(self.vault_role_id, &["VAULT_ROLE_ID"]),
            vault_secret_id: flag_or_env(self.vault_secret_id, &["VAULT_SECRET_ID"]),
        };
        ControllerSettings {
            kubeconfig: self.kubeconfig,
            namespace: self.namespace,
            watch_namespace: self.watch_namespace,
            options: ReconcileOptions {
                allow_cross_namespace: self.allow_cross_namespace,
                delimiters: self.template_delims.unwrap_or_default(),
            },
            defaults,
            metrics_port: self.metrics_port,
        }
    }
}

/// Lease holder identity for this replica
fn identity() -> String {
    ["POD_NAME", "HOSTNAME"]
        .iter()
        .find_map(|key| std::env::var(key).ok().filter(|v| !v.is_empty()))
        .unwrap_or_else(|| format!("dockhand-{}", std::process::id()))
}

async fn run_controller(args: ControllerArgs) -> Result<()> {
    let init = initialize(args.into_settings()).await?;
    run_watch_loop(init.secrets, init.reconciler, init.server_state, init.watch_namespace).await
}

async fn run_server(args: ServerArgs) -> Result<()> {
    log_build_info("webhook");
    let _server_state = start_probe_server(args.metrics_port).await?;

    let client = kube_client(None).await?;
    let webhook_id = args
        .webhook_id
        .unwrap_or_else(|| format!("{}.dhs.dockhand.dev", args.name));
    let config = WebhookServerConfig {
        name: args.name,
        namespace: args.namespace,
        port: args.port,
        cert_path: args.cert,
        key_path: args.key,
        self_sign_certs: args.self_sign_certs,
        webhook_id,
        identity: identity(),
    };

    let state = Arc::new(WebhookState::new(Arc::new(KubeSecretLookup::new(client.clone()))));
    webhook::serve(client, config, CertManagerConfig::from_env(), state).await
}

#[tokio::main]
async fn main() -> Result<()> {
    install_crypto_provider();
    let cli = Cli::parse();
    init_tracing(cli.debug);

    match cli.command {
        Commands::Controller(args) => run_controller(*args).await,
        Commands::Server(args) => run_server(args).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller_settings(args: &[&str]) -> ControllerSettings {
        let cli = Cli::try_parse_from(
            ["dockhand-secrets-operator", "controller"].iter().chain(args),
        )
        .unwrap();
        match cli.command {
            Commands::Controller(args) => args.into_settings(),
            Commands::Server(_) => panic!("expected the controller subcommand"),
        }
    }

    #[test]
    fn test_home_namespace_does_not_scope_watches() {
        let settings = controller_settings(&["--namespace", "dockhand-secrets-operator"]);
        assert_eq!(settings.namespace.as_deref(), Some("dockhand-secrets-operator"));
        assert_eq!(settings.watch_scope(), None);
    }

    #[test]
    fn test_watch_namespace_scopes_watches() {
        let settings = controller_settings(&["--namespace", "dockhand", "--watch-namespace", "apps"]);
        assert_eq!(settings.watch_scope(), Some("apps"));
    }

    #[test]
    fn test_operator_alias_and_default_delimiters() {
        let cli = Cli::try_parse_from(["dockhand-secrets-operator", "operator"]).unwrap();
        let Commands::Controller(args) = cli.command else {
            panic!("expected the controller subcommand");
        };
        assert_eq!(args.into_settings().options.delimiters, Delimiters::default());
    }
}

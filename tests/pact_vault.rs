//! Pact contract tests for the HashiCorp Vault fetcher
//!
//! Covers token and AppRole authentication against the KV v1 and v2 read
//! endpoints.

mod common;

use common::{base_url, init_rustls};
use dockhand_secrets_operator::constants::OWNER_LABEL_KEY;
use dockhand_secrets_operator::controller::reconciler::output_secret::build_output_secret;
use dockhand_secrets_operator::crd::{DockhandSecret, DockhandSecretSpec, ProfileRef, SecretSpec};
use dockhand_secrets_operator::provider::vault::{VaultFetcher, VaultSettings};
use dockhand_secrets_operator::provider::{
    BackendError, BackendKind, FetcherSet, SecretFetcher, TemplateFunction,
};
use dockhand_secrets_operator::template::{Delimiters, render_data};
use pact_consumer::prelude::*;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

fn token_fetcher(addr: &str) -> VaultFetcher {
    VaultFetcher::new(&VaultSettings {
        addr: Some(addr),
        token: Some("s.test-token"),
        ..Default::default()
    })
    .expect("fetcher should build")
}

#[tokio::test]
async fn test_vault_kv_v2_read_contract() {
    init_rustls();
    let mut pact_builder = PactBuilder::new("Dockhand-Secrets-Operator", "Vault");

    pact_builder.interaction("read a KV v2 secret with a token", "", |mut i| {
        i.given("a KV v2 secret exists at secret/data/db");
        i.request
            .method("GET")
            .path("/v1/secret/data/db".to_string())
            .header("x-vault-token", "s.test-token");
        i.response
            .status(200)
            .header("content-type", "application/json")
            .json_body(json!({
                "request_id": "5e1e3e4c-0000-0000-0000-000000000000",
                "lease_duration": 0,
                "renewable": false,
                "data": {
                    "data": {"password": "hunter2", "username": "app"},
                    "metadata": {"version": 4, "destroyed": false}
                }
            }));
        i
    });

    let mock_server = pact_builder.start_mock_server(None, None);
    let addr = base_url(mock_server.url());
    let fetcher = token_fetcher(&addr);

    assert_eq!(fetcher.kind(), BackendKind::Vault);
    let raw = fetcher.fetch("secret/data/db").await.expect("read should succeed");
    let value: serde_json::Value = serde_json::from_str(&raw).expect("fetcher returns JSON");
    assert_eq!(value, json!({"password": "hunter2", "username": "app"}));
}

#[tokio::test]
async fn test_vault_kv_v1_template_function_contract() {
    init_rustls();
    let mut pact_builder = PactBuilder::new("Dockhand-Secrets-Operator", "Vault");

    pact_builder.interaction("read a KV v1 secret with a token", "", |mut i| {
        i.given("a KV v1 secret exists at kv/app");
        i.request
            .method("GET")
            .path("/v1/kv/app".to_string())
            .header("x-vault-token", "s.test-token");
        i.response
            .status(200)
            .header("content-type", "application/json")
            .json_body(json!({
                "lease_duration": 2764800,
                "renewable": false,
                "data": {"api-key": "abc123", "port": 5432}
            }));
        i
    });

    let mock_server = pact_builder.start_mock_server(None, None);
    let addr = base_url(mock_server.url());
    let mut fetchers = FetcherSet::new();
    fetchers.insert(Arc::new(token_fetcher(&addr)));

    let key = fetchers
        .invoke(TemplateFunction::Vault, "kv/app", Some("api-key"))
        .await
        .expect("vault should extract the key");
    assert_eq!(key, "abc123");
}

#[tokio::test]
async fn test_vault_approle_login_then_read_contract() {
    init_rustls();
    let mut pact_builder = PactBuilder::new("Dockhand-Secrets-Operator", "Vault");

    pact_builder
        .interaction("log in with AppRole", "", |mut i| {
            i.given("AppRole 'dockhand' is enabled");
            i.request
                .method("POST")
                .path("/v1/auth/approle/login".to_string())
                .header("content-type", "application/json")
                .json_body(json!({
                    "role_id": "role-1234",
                    "secret_id": "secret-5678"
                }));
            i.response
                .status(200)
                .header("content-type", "application/json")
                .json_body(json!({
                    "auth": {
                        "client_token": "s.approle-token",
                        "lease_duration": 3600,
                        "renewable": true,
                        "policies": ["default", "dockhand"]
                    }
                }));
            i
        })
        .interaction("read a KV v2 secret with an AppRole token", "", |mut i| {
            i.given("a KV v2 secret exists at secret/data/db");
            i.request
                .method("GET")
                .path("/v1/secret/data/db".to_string())
                .header("x-vault-token", "s.approle-token");
            i.response
                .status(200)
                .header("content-type", "application/json")
                .json_body(json!({
                    "data": {
                        "data": {"password": "hunter2"},
                        "metadata": {"version": 1}
                    }
                }));
            i
        });

    let mock_server = pact_builder.start_mock_server(None, None);
    let addr = base_url(mock_server.url());
    let fetcher = VaultFetcher::new(&VaultSettings {
        addr: Some(addr.as_str()),
        role_id: Some("role-1234"),
        secret_id: Some("secret-5678"),
        ..Default::default()
    })
    .expect("fetcher should build");

    let raw = fetcher.fetch("secret/data/db").await.expect("read should succeed");
    assert_eq!(raw, r#"{"password":"hunter2"}"#);
}

#[tokio::test]
async fn test_vault_missing_path_contract() {
    init_rustls();
    let mut pact_builder = PactBuilder::new("Dockhand-Secrets-Operator", "Vault");

    pact_builder.interaction("read a path with no secret", "", |mut i| {
        i.given("nothing is stored at secret/data/missing");
        i.request
            .method("GET")
            .path("/v1/secret/data/missing".to_string())
            .header("x-vault-token", "s.test-token");
        i.response
            .status(404)
            .header("content-type", "application/json")
            .json_body(json!({"errors": []}));
        i
    });

    let mock_server = pact_builder.start_mock_server(None, None);
    let addr = base_url(mock_server.url());
    let err = token_fetcher(&addr)
        .fetch("secret/data/missing")
        .await
        .expect_err("missing path should fail");
    assert!(matches!(
        err,
        BackendError::NotFound { backend: BackendKind::Vault, .. }
    ));
}

#[test]
fn test_vault_requires_credentials() {
    let err = VaultFetcher::new(&VaultSettings {
        addr: Some("http://127.0.0.1:8200"),
        role_id: Some("role-only"),
        ..Default::default()
    })
    .expect_err("role id alone is not enough");
    assert!(matches!(err, BackendError::Config { backend: BackendKind::Vault, .. }));

    assert!(VaultFetcher::new(&VaultSettings::default()).is_err());
}

#[tokio::test]
async fn test_vault_backed_secret_renders_into_output_secret() {
    init_rustls();
    let mut pact_builder = PactBuilder::new("Dockhand-Secrets-Operator", "Vault");

    pact_builder.interaction("read database credentials for a DockhandSecret", "", |mut i| {
        i.given("a KV v2 secret exists at secret/data/db");
        i.request
            .method("GET")
            .path("/v1/secret/data/db".to_string())
            .header("x-vault-token", "s.test-token");
        i.response
            .status(200)
            .header("content-type", "application/json")
            .json_body(json!({
                "data": {
                    "data": {"password": "hunter2", "username": "app"},
                    "metadata": {"version": 2}
                }
            }));
        i
    });

    let mock_server = pact_builder.start_mock_server(None, None);
    let addr = base_url(mock_server.url());
    let mut fetchers = FetcherSet::new();
    fetchers.insert(Arc::new(token_fetcher(&addr)));

    let mut ds = DockhandSecret::new(
        "db-credentials",
        DockhandSecretSpec {
            sync_interval: None,
            data: BTreeMap::from([
                (
                    "DATABASE_URL".to_string(),
                    r#"postgres://<< vault "secret/data/db" "username" >>:<< vault "secret/data/db" "password" >>@db:5432/app"#
                        .to_string(),
                ),
                ("MODE".to_string(), "production".to_string()),
            ]),
            secret_spec: SecretSpec {
                name: "db".to_string(),
                type_: "Opaque".to_string(),
                labels: BTreeMap::new(),
                annotations: BTreeMap::new(),
            },
            profile: ProfileRef {
                name: "vault".to_string(),
                namespace: None,
            },
        },
    );
    ds.metadata.namespace = Some("apps".to_string());

    let rendered = render_data(&ds.spec.data, &fetchers, &Delimiters::default())
        .await
        .expect("render should succeed");
    let secret = build_output_secret(None, &ds, "apps", rendered);

    let data = secret.data.expect("data should be set");
    assert_eq!(data["DATABASE_URL"].0, b"postgres://app:hunter2@db:5432/app");
    assert_eq!(data["MODE"].0, b"production");
    assert_eq!(secret.metadata.name.as_deref(), Some("db"));
    assert_eq!(
        secret.metadata.labels.unwrap_or_default().get(OWNER_LABEL_KEY).map(String::as_str),
        Some("db-credentials")
    );
}

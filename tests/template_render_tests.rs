//! Rendering DockhandSecret data through the public template API with
//! in-process backends.

use async_trait::async_trait;
use dockhand_secrets_operator::provider::{BackendError, BackendKind, FetcherSet, SecretFetcher};
use dockhand_secrets_operator::template::{Delimiters, TemplateError, render_data};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug)]
struct MapFetcher {
    kind: BackendKind,
    values: HashMap<String, String>,
    calls: AtomicUsize,
}

impl MapFetcher {
    fn new(kind: BackendKind, values: &[(&str, &str)]) -> Arc<Self> {
        Arc::new(Self {
            kind,
            values: values
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl SecretFetcher for MapFetcher {
    fn kind(&self) -> BackendKind {
        self.kind
    }

    async fn fetch(&self, name: &str) -> Result<String, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.values.get(name).cloned().ok_or_else(|| BackendError::NotFound {
            backend: self.kind,
            name: name.to_string(),
        })
    }
}

fn data(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
    entries
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

#[tokio::test]
async fn test_renders_across_backends() {
    let aws = MapFetcher::new(BackendKind::Aws, &[("prod/db", r#"{"user":"app","port":5432}"#)]);
    let azure = MapFetcher::new(BackendKind::Azure, &[("api-key", "k-123")]);
    let mut fetchers = FetcherSet::new();
    fetchers.insert(aws);
    fetchers.insert(azure);

    let rendered = render_data(
        &data(&[
            ("DB_URL", r#"postgres://<< aws "prod/db" "user" >>@db:<< aws "prod/db" "port" >>"#),
            ("API_KEY", r#"<< azureText "api-key" >>"#),
            ("STATIC", "unchanged"),
        ]),
        &fetchers,
        &Delimiters::default(),
    )
    .await
    .unwrap();

    assert_eq!(rendered["DB_URL"], "postgres://app@db:5432");
    assert_eq!(rendered["API_KEY"], "k-123");
    assert_eq!(rendered["STATIC"], "unchanged");
}

#[tokio::test]
async fn test_default_delimiters_leave_braces_alone() {
    let vault = MapFetcher::new(BackendKind::Vault, &[("kv/app", r#"{"token":"t0k"}"#)]);
    let mut fetchers = FetcherSet::new();
    fetchers.insert(vault.clone());

    let rendered = render_data(
        &data(&[("config.json", r#"{"token": "<< vault "kv/app" "token" >>", "tpl": "{{ .Name }}"}"#)]),
        &fetchers,
        &Delimiters::default(),
    )
    .await
    .unwrap();

    assert_eq!(
        rendered["config.json"],
        r#"{"token": "t0k", "tpl": "{{ .Name }}"}"#
    );
    assert_eq!(vault.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_default_delimiters_do_not_pass_actions_through() {
    let vault = MapFetcher::new(BackendKind::Vault, &[("db", r#"{"password":"hunter2"}"#)]);
    let mut fetchers = FetcherSet::new();
    fetchers.insert(vault);

    let rendered = render_data(
        &data(&[("password", r#"<< vault "db" "password" >>"#)]),
        &fetchers,
        &Delimiters::default(),
    )
    .await
    .unwrap();

    assert_eq!(rendered["password"], "hunter2");
}

#[tokio::test]
async fn test_brace_delimiters_override() {
    let vault = MapFetcher::new(BackendKind::Vault, &[("kv/app", r#"{"token":"t0k"}"#)]);
    let mut fetchers = FetcherSet::new();
    fetchers.insert(vault);

    let delims: Delimiters = "{{,}}".parse().unwrap();
    let rendered = render_data(
        &data(&[("token", r#"{{ vault "kv/app" "token" }} << kept >>"#)]),
        &fetchers,
        &delims,
    )
    .await
    .unwrap();

    assert_eq!(rendered["token"], "t0k << kept >>");
}

#[tokio::test]
async fn test_parse_errors_abort_before_any_backend_call() {
    let gcp = MapFetcher::new(BackendKind::Gcp, &[("db", "x")]);
    let mut fetchers = FetcherSet::new();
    fetchers.insert(gcp.clone());

    let err = render_data(
        &data(&[("a", r#"<< gcpText "db" >>"#), ("b", r#"<< nope "db" >>"#)]),
        &fetchers,
        &Delimiters::default(),
    )
    .await
    .unwrap_err();

    match err {
        TemplateError::Data { key, source } => {
            assert_eq!(key, "b");
            assert!(matches!(*source, TemplateError::UnknownFunction(ref f) if f == "nope"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(gcp.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unconfigured_backend_names_the_key() {
    let err = render_data(
        &data(&[("password", r#"<< aws "prod/db" "password" >>"#)]),
        &FetcherSet::new(),
        &Delimiters::default(),
    )
    .await
    .unwrap_err();

    let message = err.to_string();
    assert!(message.contains("password"), "{message}");
    assert!(message.contains("aws"), "{message}");
}

//! Asynchronous template evaluation against a profile's [`FetcherSet`].

use super::parser::{Expr, Node, Template, parse};
use super::{Delimiters, TemplateError};
use crate::provider::FetcherSet;
use futures::future::BoxFuture;
use std::collections::BTreeMap;
use tracing::{Instrument, debug, info_span};

fn eval<'a>(expr: &'a Expr, fetchers: &'a FetcherSet) -> BoxFuture<'a, Result<String, TemplateError>> {
    Box::pin(async move {
        match expr {
            Expr::Literal(s) => Ok(s.clone()),
            Expr::Call { function, args } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(eval(arg, fetchers).await?);
                }
                let name = values.first().map_or("", String::as_str);
                let key = values.get(1).map(String::as_str);
                fetchers
                    .invoke(*function, name, key)
                    .await
                    .map_err(|source| TemplateError::Call {
                        function: function.name(),
                        source,
                    })
            }
        }
    })
}

/// Render a parsed template
pub async fn render(template: &Template, fetchers: &FetcherSet) -> Result<String, TemplateError> {
    let mut out = String::new();
    for node in template.nodes() {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Action(expr) => out.push_str(&eval(expr, fetchers).await?),
        }
    }
    Ok(out)
}

/// Render every value of a DockhandSecret's `data` map.
///
/// All values are parsed before any backend call, and the first failure aborts
/// the pass so callers never see a partially rendered map.
pub async fn render_data(
    data: &BTreeMap<String, String>,
    fetchers: &FetcherSet,
    delims: &Delimiters,
) -> Result<BTreeMap<String, String>, TemplateError> {
    let wrap = |key: &str, source: TemplateError| TemplateError::Data {
        key: key.to_string(),
        source: Box::new(source),
    };

    let mut parsed = Vec::with_capacity(data.len());
    for (key, value) in data {
        let template = parse(value, delims).map_err(|e| wrap(key, e))?;
        parsed.push((key, template));
    }

    let span = info_span!("template.render", data.keys = data.len());
    async move {
        let mut rendered = BTreeMap::new();
        for (key, template) in parsed {
            let value = render(&template, fetchers)
                .await
                .map_err(|e| wrap(key, e))?;
            debug!(data.key = %key, "Rendered data value");
            rendered.insert(key.clone(), value);
        }
        Ok(rendered)
    }
    .instrument(span)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::testing::StaticFetcher;
    use crate::provider::{BackendError, BackendKind};
    use std::sync::Arc;

    fn fetchers() -> (FetcherSet, Arc<StaticFetcher>) {
        let vault = Arc::new(StaticFetcher::new(
            BackendKind::Vault,
            &[("secret/data/db", r#"{"user":"app","password":"s3cr3t","port":5432}"#)],
        ));
        let gcp = Arc::new(StaticFetcher::new(BackendKind::Gcp, &[("path", "secret/data/db")]));
        let mut set = FetcherSet::new();
        set.insert(Arc::clone(&vault) as _);
        set.insert(gcp);
        (set, vault)
    }

    fn data(entries: &[(&str, &str)]) -> BTreeMap<String, String> {
        entries
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[tokio::test]
    async fn test_renders_text_and_calls() {
        let (set, _) = fetchers();
        let rendered = render_data(
            &data(&[
                ("url", r#"postgres://{{ vault "secret/data/db" "user" }}:{{ vault "secret/data/db" "password" }}@db"#),
                ("port", r#"{{ vault "secret/data/db" "port" }}"#),
                ("plain", "unchanged"),
            ]),
            &set,
            &Delimiters::braces(),
        )
        .await
        .unwrap();

        assert_eq!(rendered["url"], "postgres://app:s3cr3t@db");
        assert_eq!(rendered["port"], "5432");
        assert_eq!(rendered["plain"], "unchanged");
    }

    #[tokio::test]
    async fn test_nested_call_feeds_argument() {
        let (set, _) = fetchers();
        let rendered = render_data(
            &data(&[("pw", r#"{{ vault (gcpText "path") "password" }}"#)]),
            &set,
            &Delimiters::braces(),
        )
        .await
        .unwrap();
        assert_eq!(rendered["pw"], "s3cr3t");
    }

    #[tokio::test]
    async fn test_one_bad_value_fails_whole_pass() {
        let (set, _) = fetchers();
        let err = render_data(
            &data(&[
                ("a", r#"{{ vault "secret/data/db" "user" }}"#),
                ("b", r#"{{ vault "secret/data/db" "password" }}"#),
                ("c", r#"{{ vault "secret/data/db" "missing" }}"#),
                ("d", "static"),
                ("e", r#"{{ vault "secret/data/db" "port" }}"#),
            ]),
            &set,
            &Delimiters::braces(),
        )
        .await
        .unwrap_err();

        match err {
            TemplateError::Data { key, source } => {
                assert_eq!(key, "c");
                assert!(matches!(
                    *source,
                    TemplateError::Call {
                        source: BackendError::MissingKey { .. },
                        ..
                    }
                ));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_parse_errors_happen_before_any_fetch() {
        let (set, vault) = fetchers();
        let err = render_data(
            &data(&[
                ("a", r#"{{ vault "secret/data/db" "user" }}"#),
                ("z", r#"{{ vault "secret/data/db" }}"#),
            ]),
            &set,
            &Delimiters::braces(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, TemplateError::Data { ref key, .. } if key == "z"));
        assert_eq!(vault.calls(), 0);
    }

    #[tokio::test]
    async fn test_unconfigured_backend_is_render_error() {
        let (set, _) = fetchers();
        let err = render_data(
            &data(&[("k", r#"{{ aws "prod/db" "password" }}"#)]),
            &set,
            &Delimiters::braces(),
        )
        .await
        .unwrap_err();

        let TemplateError::Data { source, .. } = err else {
            panic!("expected data error");
        };
        assert!(matches!(
            *source,
            TemplateError::Call {
                function: "aws",
                source: BackendError::NotConfigured(BackendKind::Aws),
            }
        ));
    }
}

//! Admission webhook tests
//!
//! Drive the `/mutate` router in-process with canned AdmissionReviews and an
//! in-memory Secret lookup.

use axum::body::Body;
use axum::http::{Request, StatusCode, header::CONTENT_TYPE};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use dockhand_secrets_operator::constants::{
    AUTO_UPDATE_LABEL_KEY, OWNER_LABEL_KEY, SECRET_CHECKSUM_ANNOTATION_KEY,
    SECRET_NAMES_ANNOTATION_KEY,
};
use dockhand_secrets_operator::propagation::{
    InMemorySecretLookup, PropagationOptions, RetryPolicy, checksum_secrets,
};
use dockhand_secrets_operator::webhook::{self, WebhookState};
use http_body_util::BodyExt;
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::Secret;
use kube::api::ObjectMeta;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

fn db_secret() -> Secret {
    Secret {
        metadata: ObjectMeta {
            name: Some("db".to_string()),
            namespace: Some("apps".to_string()),
            labels: Some(BTreeMap::from([(
                OWNER_LABEL_KEY.to_string(),
                "db-credentials".to_string(),
            )])),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(
            "password".to_string(),
            ByteString(b"hunter2".to_vec()),
        )])),
        ..Default::default()
    }
}

fn state(lookup: InMemorySecretLookup) -> Arc<WebhookState> {
    Arc::new(WebhookState {
        lookup: Arc::new(lookup),
        options: PropagationOptions {
            retry: RetryPolicy {
                attempts: 1,
                delay: Duration::ZERO,
                ..PropagationOptions::admission().retry
            },
            ..PropagationOptions::admission()
        },
    })
}

fn deployment(labels: Value) -> Value {
    json!({
        "apiVersion": "apps/v1",
        "kind": "Deployment",
        "metadata": {"name": "web", "labels": labels},
        "spec": {
            "selector": {"matchLabels": {"app": "web"}},
            "template": {
                "metadata": {"labels": {"app": "web"}},
                "spec": {
                    "containers": [{
                        "name": "web",
                        "image": "nginx",
                        "envFrom": [{"secretRef": {"name": "db"}}]
                    }]
                }
            }
        }
    })
}

fn review(kind: &str, group: &str, resource: &str, object: Value) -> Value {
    json!({
        "apiVersion": "admission.k8s.io/v1",
        "kind": "AdmissionReview",
        "request": {
            "uid": "705ab4f5-6393-11e8-b7cc-42010a800002",
            "kind": {"group": group, "version": "v1", "kind": kind},
            "resource": {"group": group, "version": "v1", "resource": resource},
            "name": "web",
            "namespace": "apps",
            "operation": "CREATE",
            "userInfo": {"username": "admin"},
            "object": object,
            "dryRun": false
        }
    })
}

async fn post(state: Arc<WebhookState>, content_type: &str, body: Vec<u8>) -> (StatusCode, Vec<u8>) {
    let request = Request::builder()
        .method("POST")
        .uri("/mutate")
        .header(CONTENT_TYPE, content_type)
        .body(Body::from(body))
        .unwrap();
    let response = webhook::router(state).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, bytes.to_vec())
}

async fn post_review(state: Arc<WebhookState>, review: &Value) -> Value {
    let (status, body) = post(state, "application/json", serde_json::to_vec(review).unwrap()).await;
    assert_eq!(status, StatusCode::OK);
    let review: Value = serde_json::from_slice(&body).unwrap();
    review["response"].clone()
}

fn decode_patch(response: &Value) -> Vec<Value> {
    let encoded = response["patch"].as_str().expect("response should carry a patch");
    serde_json::from_slice(&STANDARD.decode(encoded).unwrap()).unwrap()
}

#[tokio::test]
async fn test_empty_body_is_bad_request() {
    let (status, body) = post(state(InMemorySecretLookup::new()), "application/json", Vec::new()).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(String::from_utf8(body).unwrap(), "empty body");
}

#[tokio::test]
async fn test_wrong_content_type_is_rejected() {
    let (status, _) = post(state(InMemorySecretLookup::new()), "text/plain", b"{}".to_vec()).await;
    assert_eq!(status, StatusCode::UNSUPPORTED_MEDIA_TYPE);
}

#[tokio::test]
async fn test_undecodable_review_is_denied() {
    let (status, body) = post(state(InMemorySecretLookup::new()), "application/json", b"not json".to_vec()).await;
    assert_eq!(status, StatusCode::OK);
    let review: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(review["response"]["allowed"], json!(false));
}

#[tokio::test]
async fn test_other_kinds_pass_through() {
    let config_map = json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": {"name": "web"},
        "data": {"a": "b"}
    });
    let response = post_review(
        state(InMemorySecretLookup::new()),
        &review("ConfigMap", "", "configmaps", config_map),
    )
    .await;
    assert_eq!(response["allowed"], json!(true));
    assert_eq!(response["uid"], json!("705ab4f5-6393-11e8-b7cc-42010a800002"));
    assert!(response.get("patch").is_none_or(Value::is_null));
}

#[tokio::test]
async fn test_unlabelled_deployment_is_not_patched() {
    let lookup = InMemorySecretLookup::new();
    lookup.insert("apps", db_secret());
    let response = post_review(
        state(lookup),
        &review("Deployment", "apps", "deployments", deployment(json!({"app": "web"}))),
    )
    .await;
    assert_eq!(response["allowed"], json!(true));
    assert!(response.get("patch").is_none_or(Value::is_null));
}

#[tokio::test]
async fn test_labelled_deployment_gets_checksum_and_owner_label() {
    let lookup = InMemorySecretLookup::new();
    lookup.insert("apps", db_secret());
    let labels = json!({"app": "web", AUTO_UPDATE_LABEL_KEY: "true"});

    let response = post_review(
        state(lookup),
        &review("Deployment", "apps", "deployments", deployment(labels)),
    )
    .await;
    assert_eq!(response["allowed"], json!(true));
    assert_eq!(response["patchType"], json!("JSONPatch"));

    let ops = decode_patch(&response);
    let annotations = ops
        .iter()
        .find(|op| op["path"] == "/spec/template/metadata/annotations")
        .expect("annotations should be added");
    assert_eq!(annotations["op"], "add");
    assert_eq!(
        annotations["value"][SECRET_CHECKSUM_ANNOTATION_KEY],
        json!(checksum_secrets(&[db_secret()]))
    );
    assert_eq!(annotations["value"][SECRET_NAMES_ANNOTATION_KEY], json!("db"));

    let owner_label = ops
        .iter()
        .find(|op| op["path"] == "/metadata/labels/secret.dhs.dockhand.dev~1db-credentials")
        .expect("owner label should be added");
    assert_eq!(owner_label["op"], "add");
    assert_eq!(owner_label["value"], "true");
}

#[tokio::test]
async fn test_missing_secret_still_admits_with_empty_checksum() {
    let labels = json!({"app": "web", AUTO_UPDATE_LABEL_KEY: "true"});
    let response = post_review(
        state(InMemorySecretLookup::new()),
        &review("StatefulSet", "apps", "statefulsets", {
            let mut object = deployment(labels);
            object["kind"] = json!("StatefulSet");
            object["spec"]["serviceName"] = json!("web");
            object
        }),
    )
    .await;
    assert_eq!(response["allowed"], json!(true));

    let ops = decode_patch(&response);
    let annotations = ops
        .iter()
        .find(|op| op["path"] == "/spec/template/metadata/annotations")
        .expect("annotations should be added");
    assert_eq!(annotations["value"][SECRET_CHECKSUM_ANNOTATION_KEY], json!(""));
}

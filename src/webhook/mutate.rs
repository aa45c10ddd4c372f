//! # Mutating Admission Handler
//!
//! Handles AdmissionReview requests for Deployments, DaemonSets and
//! StatefulSets carrying the auto-update label, stamping the secret checksum
//! and dependency annotations onto the pod template before the object is
//! persisted.

use crate::observability::metrics;
use crate::propagation::{PropagationOptions, SecretLookup, Workload, auto_update_requested, plan_patch};
use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
};
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use kube::{Resource, ResourceExt};
use kube::api::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// State shared by admission requests
pub struct WebhookState {
    pub lookup: Arc<dyn SecretLookup>,
    pub options: PropagationOptions,
}

impl std::fmt::Debug for WebhookState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookState")
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl WebhookState {
    #[must_use]
    pub fn new(lookup: Arc<dyn SecretLookup>) -> Self {
        Self {
            lookup,
            options: PropagationOptions::admission(),
        }
    }
}

/// Requests rejected before an AdmissionReview could be read
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("empty body")]
    EmptyBody,

    #[error("invalid Content-Type {0:?}, expect `application/json`")]
    UnsupportedContentType(String),
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let status = match self {
            WebhookError::EmptyBody => StatusCode::BAD_REQUEST,
            WebhookError::UnsupportedContentType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        };
        (status, self.to_string()).into_response()
    }
}

fn is_json(headers: &HeaderMap) -> Result<(), WebhookError> {
    let content_type = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let media_type = content_type.split(';').next().unwrap_or_default().trim();
    if media_type.eq_ignore_ascii_case("application/json") {
        Ok(())
    } else {
        Err(WebhookError::UnsupportedContentType(content_type.to_string()))
    }
}

/// `POST /mutate`
pub async fn mutate_handler(
    State(state): State<Arc<WebhookState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<AdmissionReview<DynamicObject>>, WebhookError> {
    if body.is_empty() {
        warn!("Rejecting admission request with empty body");
        return Err(WebhookError::EmptyBody);
    }
    is_json(&headers).inspect_err(|e| warn!(error = %e, "Rejecting admission request"))?;

    let review: AdmissionReview<DynamicObject> = match serde_json::from_slice(&body) {
        Ok(review) => review,
        Err(e) => {
            error!(error = %e, "Unable to decode AdmissionReview");
            metrics::increment_webhook_admissions("unknown", "error");
            return Ok(Json(AdmissionResponse::invalid(e.to_string()).into_review()));
        }
    };
    let request: AdmissionRequest<DynamicObject> = match review.try_into() {
        Ok(request) => request,
        Err(e) => {
            error!(error = %e, "AdmissionReview has no request");
            metrics::increment_webhook_admissions("unknown", "error");
            return Ok(Json(AdmissionResponse::invalid(e.to_string()).into_review()));
        }
    };

    let response = mutate(&state, &request).await;
    Ok(Json(response.into_review()))
}

/// Dispatch on the request kind; unhandled kinds are allowed untouched
pub async fn mutate(state: &WebhookState, request: &AdmissionRequest<DynamicObject>) -> AdmissionResponse {
    match request.kind.kind.as_str() {
        "Deployment" => mutate_workload::<Deployment>(state, request).await,
        "DaemonSet" => mutate_workload::<DaemonSet>(state, request).await,
        "StatefulSet" => mutate_workload::<StatefulSet>(state, request).await,
        other => {
            debug!(kind = other, uid = %request.uid, "Unhandled kind, allowing");
            AdmissionResponse::from(request)
        }
    }
}

async fn mutate_workload<W: Workload>(
    state: &WebhookState,
    request: &AdmissionRequest<DynamicObject>,
) -> AdmissionResponse {
    let uid = &request.uid;
    let Some(object) = request.object.as_ref() else {
        debug!(uid = %uid, workload.kind = W::KIND, "No object in request, allowing");
        return AdmissionResponse::from(request);
    };

    let mut workload: W = match serde_json::to_value(object).and_then(serde_json::from_value) {
        Ok(workload) => workload,
        Err(e) => {
            error!(uid = %uid, workload.kind = W::KIND, error = %e, "Unable to decode workload");
            metrics::increment_webhook_admissions(W::KIND, "error");
            return AdmissionResponse::from(request).deny(e.to_string());
        }
    };
    // Objects being created often arrive without a namespace in their metadata
    if workload.meta().namespace.is_none() {
        workload.meta_mut().namespace.clone_from(&request.namespace);
    }

    if !auto_update_requested(workload.labels()) {
        debug!(
            uid = %uid,
            workload.kind = W::KIND,
            resource.name = %workload.name_any(),
            "No auto-update label, allowing"
        );
        metrics::increment_webhook_admissions(W::KIND, "allowed");
        return AdmissionResponse::from(request);
    }

    let patch = match plan_patch(state.lookup.as_ref(), &workload, &state.options).await {
        Ok(Some(patch)) => patch,
        Ok(None) => {
            metrics::increment_webhook_admissions(W::KIND, "allowed");
            return AdmissionResponse::from(request);
        }
        Err(e) => {
            error!(uid = %uid, workload.kind = W::KIND, error = %e, "Unable to compute workload patch");
            metrics::increment_webhook_admissions(W::KIND, "error");
            return AdmissionResponse::from(request).deny(e.to_string());
        }
    };

    info!(
        uid = %uid,
        workload.kind = W::KIND,
        resource.name = %workload.name_any(),
        resource.namespace = ?workload.namespace(),
        operations = patch.0.len(),
        "Patching workload at admission"
    );
    match AdmissionResponse::from(request).with_patch(patch) {
        Ok(response) => {
            metrics::increment_webhook_admissions(W::KIND, "patched");
            response
        }
        Err(e) => {
            error!(uid = %uid, error = %e, "Failed to serialize patch");
            metrics::increment_webhook_admissions(W::KIND, "error");
            AdmissionResponse::from(request).deny(format!("patch serialization error: {e}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_accepts_charset() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, "application/json; charset=utf-8".parse().unwrap());
        assert!(is_json(&headers).is_ok());
    }

    #[test]
    fn test_content_type_rejects_others() {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, "text/plain".parse().unwrap());
        assert!(matches!(
            is_json(&headers),
            Err(WebhookError::UnsupportedContentType(_))
        ));
        assert!(is_json(&HeaderMap::new()).is_err());
    }

    #[test]
    fn test_error_status_codes() {
        assert_eq!(WebhookError::EmptyBody.into_response().status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            WebhookError::UnsupportedContentType("text/plain".to_string())
                .into_response()
                .status(),
            StatusCode::UNSUPPORTED_MEDIA_TYPE
        );
    }
}

//! # Events
//!
//! Kubernetes Events for DockhandSecrets, published through a trait so the
//! reconciler can run against a no-op publisher in tests.
//!
//! Publishing is fire-and-forget: a failed event is logged and never fails
//! reconciliation.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::Client;
use kube_runtime::events::{Event, EventType, Recorder, Reporter};
use tracing::warn;

#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Publisher backed by `kube::runtime::events::Recorder`
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl std::fmt::Debug for KubeEventPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeEventPublisher").finish_non_exhaustive()
    }
}

impl KubeEventPublisher {
    /// `controller_name` becomes the Event's reportingComponent
    #[must_use]
    pub fn new(client: Client, controller_name: &str) -> Self {
        let reporter = Reporter {
            controller: controller_name.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = Event {
            type_,
            reason: reason.to_string(),
            note,
            action: action.to_string(),
            secondary: None,
        };
        if let Err(e) = self.recorder.publish(&event, resource_ref).await {
            warn!(
                reason,
                action,
                error = %e,
                "Failed to publish Kubernetes event"
            );
        }
    }
}

/// Drops every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(
        &self,
        _resource_ref: &ObjectReference,
        _type_: EventType,
        _reason: &str,
        _action: &str,
        _note: Option<String>,
    ) {
    }
}

/// Event reasons, shown under REASON in `kubectl get events`
pub mod reasons {
    /// Profile lives in another namespace and cross-namespace access is off
    pub const ERR_UNAUTHORIZED: &str = "ErrUnauthorized";
    /// Profile missing or its backend clients could not be built
    pub const ERR_LOADING_PROFILE: &str = "ErrLoadingProfile";
    /// A data template failed to parse or render
    pub const ERR_PARSING_SECRET: &str = "ErrParsingSecret";
    /// Output Secret created or updated
    pub const SUCCESS: &str = "Success";
    /// Output Secret could not be written
    pub const ERROR: &str = "Error";
}

/// Event actions, shown under ACTION in `kubectl get events`
pub mod actions {
    pub const RECONCILE: &str = "Reconcile";
    pub const WRITE_SECRET: &str = "WriteSecret";
}

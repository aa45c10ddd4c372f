//! # Reconciler
//!
//! Renders each DockhandSecret into its output Secret and keeps dependent
//! workloads pointed at the current data.
//!
//! ## Flow
//!
//! 1. Deleted resources run finalizer cleanup and stop there
//! 2. [`sync::plan`] decides between a full pass, a timed resync, a wait, or a drift check
//! 3. A full pass authorizes the profile, builds backend clients, renders data,
//!    writes the Secret, stamps `Ready` status, and patches dependent workloads
//!
//! Failures publish a Warning event and set `ErrApplied` before the error is
//! handed to the error policy for backoff.

pub mod access;
pub mod events;
pub mod output_secret;
pub mod profile;
pub mod reconcile;
pub mod status;
pub mod sync;
pub mod watches;

pub use access::authorize_profile;
pub use events::{EventPublisher, KubeEventPublisher, NoopEventPublisher};
pub use profile::{ProfileError, ProfileResolver};
pub use reconcile::reconcile;

use crate::config::ControllerConfig;
use crate::controller::backoff::FibonacciBackoff;
use crate::propagation::SecretLookup;
use crate::provider::{BackendError, FetcherRegistry};
use crate::template::{Delimiters, TemplateError};
use kube::Client;
use kube_runtime::finalizer::Error as FinalizerError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReconcilerError {
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error(
        "profile {profile_namespace}/{profile} is outside namespace {namespace} and cross-namespace profiles are disabled"
    )]
    Unauthorized {
        namespace: String,
        profile_namespace: String,
        profile: String,
    },

    #[error(transparent)]
    Profile(#[from] ProfileError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Template(#[from] TemplateError),

    #[error("unable to write Secret {namespace}/{name}: {source}")]
    Write {
        namespace: String,
        name: String,
        #[source]
        source: kube::Error,
    },

    #[error("object is missing {0}")]
    MissingObjectKey(&'static str),

    #[error("finalizer error: {0}")]
    Finalizer(#[source] Box<FinalizerError<ReconcilerError>>),
}

impl ReconcilerError {
    /// Warning event reason for this failure
    #[must_use]
    pub fn event_reason(&self) -> &'static str {
        match self {
            ReconcilerError::Unauthorized { .. } => events::reasons::ERR_UNAUTHORIZED,
            ReconcilerError::Profile(_) | ReconcilerError::Backend(_) => {
                events::reasons::ERR_LOADING_PROFILE
            }
            ReconcilerError::Template(_) => events::reasons::ERR_PARSING_SECRET,
            ReconcilerError::Kube(_)
            | ReconcilerError::Write { .. }
            | ReconcilerError::MissingObjectKey(_)
            | ReconcilerError::Finalizer(_) => events::reasons::ERROR,
        }
    }

    /// Short label for the requeue metric
    #[must_use]
    pub fn metric_label(&self) -> &'static str {
        match self {
            ReconcilerError::Kube(_) => "kube",
            ReconcilerError::Unauthorized { .. } => "unauthorized",
            ReconcilerError::Profile(_) => "profile",
            ReconcilerError::Backend(_) => "backend",
            ReconcilerError::Template(_) => "template",
            ReconcilerError::Write { .. } => "write",
            ReconcilerError::MissingObjectKey(_) => "invalid-object",
            ReconcilerError::Finalizer(inner) => match inner.as_ref() {
                FinalizerError::ApplyFailed(e) | FinalizerError::CleanupFailed(e) => e.metric_label(),
                _ => "finalizer",
            },
        }
    }
}

/// Backoff state for a specific resource
#[derive(Debug, Clone)]
pub struct BackoffState {
    pub backoff: FibonacciBackoff,
    pub error_count: u32,
}

impl BackoffState {
    #[must_use]
    pub fn new(min_secs: u64, max_secs: u64) -> Self {
        Self {
            backoff: FibonacciBackoff::new(min_secs, max_secs),
            error_count: 0,
        }
    }

    pub fn increment_error(&mut self) {
        self.error_count = self.error_count.saturating_add(1);
    }

    pub fn reset(&mut self) {
        self.error_count = 0;
        self.backoff.reset();
    }
}

/// Operator-wide rendering options
#[derive(Debug, Clone, Default)]
pub struct ReconcileOptions {
    pub allow_cross_namespace: bool,
    pub delimiters: Delimiters,
}

/// Shared controller context
pub struct Reconciler {
    pub client: Client,
    pub config: ControllerConfig,
    pub options: ReconcileOptions,
    pub profiles: ProfileResolver,
    pub registry: Arc<FetcherRegistry>,
    pub events: Arc<dyn EventPublisher>,
    /// Source for the Secrets dependent workloads reference
    pub secret_lookup: Arc<dyn SecretLookup>,
    /// Backoff state per resource, keyed `namespace/name`
    pub backoff_states: Arc<Mutex<HashMap<String, BackoffState>>>,
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("options", &self.options)
            .field("profiles", &self.profiles)
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}

impl Reconciler {
    /// Clear the error backoff for `key`; returns whether it had been failing
    pub fn reset_backoff(&self, key: &str) -> bool {
        match self.backoff_states.lock() {
            Ok(mut states) => states.remove(key).is_some_and(|s| s.error_count > 0),
            Err(_) => false,
        }
    }

    /// Advance the error backoff for `key`, returning `(delay_secs, error_count)`
    pub fn next_backoff(&self, key: &str) -> Option<(u64, u32)> {
        let mut states = self.backoff_states.lock().ok()?;
        let state = states.entry(key.to_string()).or_insert_with(|| {
            BackoffState::new(self.config.backoff_min_secs, self.config.backoff_max_secs)
        });
        state.increment_error();
        Some((state.backoff.next_backoff_seconds(), state.error_count))
    }
}

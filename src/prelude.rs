//! # Prelude
//!
//! Re-exports commonly used types and traits for convenience.
//!
//! ```rust
//! use dockhand_secrets_operator::prelude::*;
//! ```

// CRD types
pub use crate::crd::*;

// Backend traits and the per-profile fetcher set
pub use crate::provider::{
    BackendError, BackendKind, FetcherRegistry, FetcherSet, SecretFetcher, TemplateFunction,
};

// Reconciler types
pub use crate::controller::reconciler::{
    BackoffState, EventPublisher, ReconcileOptions, Reconciler, ReconcilerError, reconcile,
};

// Config types
pub use crate::config::{BackendDefaults, CertManagerConfig, ControllerConfig};

// Templates and workload propagation
pub use crate::propagation::{PropagationOptions, SecretLookup, Workload};
pub use crate::template::{Delimiters, TemplateError};

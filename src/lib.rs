//! Dockhand Secrets Operator Library
//!
//! Renders Kubernetes Secrets from templates backed by AWS Secrets Manager,
//! Azure Key Vault, GCP Secret Manager and HashiCorp Vault, and keeps the
//! workloads that consume them rolling when the data changes.
//!
//! ## Quick Start
//!
//! ```rust
//! use dockhand_secrets_operator::prelude::*;
//! ```
//!
//! This brings commonly used types and traits into scope. For more specific imports,
//! use the individual modules.

pub mod certs;
pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod observability;
pub mod prelude;
pub mod propagation;
pub mod provider;
pub mod runtime;
pub mod template;
pub mod webhook;

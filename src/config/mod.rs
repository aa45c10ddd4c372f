//! # Configuration
//!
//! Runtime configuration for the operator.
//!
//! - [`ControllerConfig`] holds reconciler tunables read from the environment.
//! - [`CertManagerConfig`] holds certificate rotation and lease timings.
//! - [`BackendDefaults`] carries operator-wide backend credentials from CLI/env
//!   that profiles fall back to.

mod backend;
mod controller;

pub use backend::BackendDefaults;
pub(crate) use backend::non_empty as backend_non_empty;
pub use controller::{CertManagerConfig, ControllerConfig};

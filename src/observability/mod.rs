//! # Observability
//!
//! Prometheus metrics for the controller, webhook and certificate manager.
//! Tracing is configured in [`crate::runtime::initialization`].

pub mod metrics;

pub use metrics::*;

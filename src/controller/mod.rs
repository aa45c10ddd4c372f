//! # Controller
//!
//! The DockhandSecret reconciler together with the pieces it leans on:
//! error backoff, duration parsing, and the metrics/probe HTTP server.

pub mod backoff;
pub mod reconciler;
pub mod server;
pub mod validation;

//! # Runtime
//!
//! Process-level wiring for the operator binary.
//!
//! - [`initialization`] sets up tracing, metrics, the probe server, and the reconciler context
//! - [`watch_loop`] drives the controller and restarts it when its stream ends
//! - [`error_policy`] decides requeue delays and reacts to watch errors

pub mod error_policy;
pub mod initialization;
pub mod watch_loop;

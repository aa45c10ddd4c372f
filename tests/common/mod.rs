//! Shared setup for the integration tests

#![allow(dead_code)]

use std::sync::Once;

static RUSTLS_INIT: Once = Once::new();

/// Install ring as the rustls provider once per test binary
///
/// reqwest and the Pact mock server both build rustls configs, so this has to
/// run before the first client is created.
pub fn init_rustls() {
    RUSTLS_INIT.call_once(|| {
        // Another test in the same binary may have won the race through the library helper
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Mock server URL without the trailing slash
pub fn base_url(url: impl std::fmt::Display) -> String {
    url.to_string().trim_end_matches('/').to_string()
}

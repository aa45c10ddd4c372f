//! # Fetcher Cache
//!
//! TTL cache wrapped around any [`SecretFetcher`]. Entries are keyed by secret
//! name and refetched once older than the profile's `cacheTTL`. A zero TTL
//! disables caching. Fetch timing and error metrics are recorded here so every
//! backend reports them the same way.

use super::{BackendError, BackendKind, SecretFetcher};
use crate::observability::metrics;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{Instrument, debug, info_span};
use zeroize::Zeroize;

struct CacheEntry {
    value: String,
    fetched_at: Instant,
}

impl Drop for CacheEntry {
    fn drop(&mut self) {
        self.value.zeroize();
    }
}

pub struct CachedFetcher {
    inner: Arc<dyn SecretFetcher>,
    ttl: Duration,
    entries: DashMap<String, CacheEntry>,
}

impl std::fmt::Debug for CachedFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedFetcher")
            .field("inner", &self.inner)
            .field("ttl", &self.ttl)
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl CachedFetcher {
    #[must_use]
    pub fn new(inner: Arc<dyn SecretFetcher>, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            entries: DashMap::new(),
        }
    }

    fn cached(&self, name: &str) -> Option<String> {
        if self.ttl.is_zero() {
            return None;
        }
        let entry = self.entries.get(name)?;
        (entry.fetched_at.elapsed() < self.ttl).then(|| entry.value.clone())
    }
}

#[async_trait]
impl SecretFetcher for CachedFetcher {
    fn kind(&self) -> BackendKind {
        self.inner.kind()
    }

    async fn fetch(&self, name: &str) -> Result<String, BackendError> {
        let backend = self.kind();
        if let Some(value) = self.cached(name) {
            debug!(backend = %backend, secret.name = name, "Serving secret from cache");
            metrics::increment_backend_cache_hits(backend.as_str());
            return Ok(value);
        }

        let span = info_span!(
            "backend.fetch",
            backend = backend.as_str(),
            secret.name = name,
            operation.success = tracing::field::Empty,
            operation.duration_ms = tracing::field::Empty,
        );
        let span_clone = span.clone();
        let start = Instant::now();

        let result = self.inner.fetch(name).instrument(span).await;

        #[allow(
            clippy::cast_possible_truncation,
            reason = "fetch durations never approach u64::MAX milliseconds"
        )]
        span_clone.record("operation.duration_ms", start.elapsed().as_millis() as u64);
        span_clone.record("operation.success", result.is_ok());

        match result {
            Ok(value) => {
                metrics::record_backend_fetch(backend.as_str(), start.elapsed().as_secs_f64());
                if !self.ttl.is_zero() {
                    self.entries.insert(
                        name.to_string(),
                        CacheEntry {
                            value: value.clone(),
                            fetched_at: Instant::now(),
                        },
                    );
                }
                Ok(value)
            }
            Err(e) => {
                metrics::increment_backend_fetch_errors(backend.as_str());
                Err(e)
            }
        }
    }
}

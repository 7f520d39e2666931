//! Query result cache.
//!
//! Results are stored in the shared store under `query_cache:{fingerprint}`
//! with a fixed time to live. The cache fails open: a lookup error is treated
//! as a miss so an unavailable store never blocks queries.

use crate::store::{SharedStore, StoreError};
use std::sync::Arc;
use std::time::Duration;

/// Key prefix for cached query results.
pub const CACHE_PREFIX: &str = "query_cache:";

/// Default time to live for cached results.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(30);

/// Fingerprint-keyed cache of serialized query results.
#[derive(Clone)]
pub struct ResultCache {
    store: Arc<dyn SharedStore>,
    ttl: Duration,
}

impl std::fmt::Debug for ResultCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCache")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

impl ResultCache {
    /// Creates a cache with the default 30 second TTL.
    pub fn new(store: Arc<dyn SharedStore>) -> Self {
        Self::with_ttl(store, DEFAULT_CACHE_TTL)
    }

    /// Creates a cache with a custom TTL.
    pub fn with_ttl(store: Arc<dyn SharedStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    /// Returns the TTL applied to every write.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Looks up a cached payload. Store errors are logged and reported as a
    /// miss.
    pub async fn get(&self, fingerprint: &str) -> Option<String> {
        match self.store.get(&cache_key(fingerprint)).await {
            Ok(hit) => hit,
            Err(e) => {
                tracing::warn!(fingerprint, error = %e, "Cache lookup failed, treating as miss");
                None
            }
        }
    }

    /// Stores a payload under the fingerprint.
    ///
    /// # Errors
    ///
    /// Returns the store error. Callers on the request path log it and carry
    /// on; the cache is never authoritative.
    pub async fn set(&self, fingerprint: &str, payload: &str) -> Result<(), StoreError> {
        self.store
            .set(&cache_key(fingerprint), payload, self.ttl)
            .await
    }
}

fn cache_key(fingerprint: &str) -> String {
    format!("{CACHE_PREFIX}{fingerprint}")
}

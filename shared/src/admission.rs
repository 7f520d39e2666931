//! Per-tenant admission control.
//!
//! Two gates protect the query backend:
//!
//! - a fixed-window rate gate: at most `rate_limit` requests per tenant per
//!   window, counted with `rate_limit:{tenant}`;
//! - a concurrency gate: at most `max_concurrent` queries in flight per
//!   tenant, counted with `concurrent_queries:{tenant}`.
//!
//! Both gates keep their counters in a [`SharedStore`] so limits hold across
//! service instances. Both fail closed: if the store cannot be reached the
//! request is rejected.

use crate::store::{Expiry, SharedStore, StoreError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Key prefix for rate gate counters.
pub const RATE_LIMIT_PREFIX: &str = "rate_limit:";

/// Key prefix for concurrency gate counters.
pub const CONCURRENCY_PREFIX: &str = "concurrent_queries:";

/// Which admission gate produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Gate {
    /// Fixed-window request rate.
    Rate,
    /// In-flight query count.
    Concurrency,
}

impl std::fmt::Display for Gate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rate => write!(f, "rate"),
            Self::Concurrency => write!(f, "concurrency"),
        }
    }
}

/// Reasons a request is not admitted.
#[derive(Debug, Error)]
pub enum AdmissionError {
    /// The tenant exceeded its request rate for the current window.
    #[error("Rate limit exceeded: more than {limit} requests per {window:?}")]
    RateLimitExceeded {
        /// Configured requests per window.
        limit: u32,
        /// Window length; also the suggested retry delay.
        window: Duration,
    },

    /// The tenant already has the maximum number of queries in flight.
    #[error("Too many concurrent queries: limit is {max}")]
    ConcurrencyLimitExceeded {
        /// Configured maximum in-flight queries.
        max: u32,
    },

    /// The shared store could not be consulted.
    #[error("Admission store unavailable for {gate} gate: {source}")]
    StoreUnavailable {
        /// Gate that was being checked.
        gate: Gate,
        /// Underlying store error.
        #[source]
        source: StoreError,
    },
}

impl AdmissionError {
    /// Returns the gate that rejected the request.
    #[must_use]
    pub fn gate(&self) -> Gate {
        match self {
            Self::RateLimitExceeded { .. } => Gate::Rate,
            Self::ConcurrencyLimitExceeded { .. } => Gate::Concurrency,
            Self::StoreUnavailable { gate, .. } => *gate,
        }
    }

    /// Suggested delay before retrying, if the gate has a natural one.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimitExceeded { window, .. } => Some(*window),
            _ => None,
        }
    }
}

/// Limits enforced by the [`AdmissionController`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdmissionConfig {
    /// Requests admitted per tenant per window.
    pub rate_limit: u32,
    /// Length of the fixed rate window.
    pub rate_window: Duration,
    /// Maximum in-flight queries per tenant.
    pub max_concurrent: u32,
    /// Lifetime of a concurrency counter, after which leaked slots are
    /// reclaimed.
    pub slot_ttl: Duration,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            rate_limit: 100,
            rate_window: Duration::from_secs(1),
            max_concurrent: 5,
            slot_ttl: Duration::from_secs(60),
        }
    }
}

/// Applies the rate and concurrency gates for each tenant.
#[derive(Clone)]
pub struct AdmissionController {
    store: Arc<dyn SharedStore>,
    config: AdmissionConfig,
}

impl std::fmt::Debug for AdmissionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdmissionController")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl AdmissionController {
    /// Creates a controller over the given store.
    pub fn new(store: Arc<dyn SharedStore>, config: AdmissionConfig) -> Self {
        Self { store, config }
    }

    /// Returns the configured limits.
    #[must_use]
    pub fn config(&self) -> &AdmissionConfig {
        &self.config
    }

    /// Counts one request against the tenant's rate window.
    ///
    /// The counter is incremented and its expiry refreshed in a single atomic
    /// store operation. A request is admitted iff the resulting count does
    /// not exceed the limit.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::RateLimitExceeded`] when over the limit and
    /// [`AdmissionError::StoreUnavailable`] when the store fails.
    pub async fn allow_request(&self, tenant_id: &str) -> Result<(), AdmissionError> {
        let key = format!("{RATE_LIMIT_PREFIX}{tenant_id}");
        let count = self
            .store
            .increment(&key, Expiry::Refresh(self.config.rate_window))
            .await
            .map_err(|source| {
                tracing::error!(tenant_id, error = %source, "Rate gate store failure");
                AdmissionError::StoreUnavailable {
                    gate: Gate::Rate,
                    source,
                }
            })?;

        if count > i64::from(self.config.rate_limit) {
            tracing::warn!(tenant_id, count, limit = self.config.rate_limit, "Rate limit exceeded");
            return Err(AdmissionError::RateLimitExceeded {
                limit: self.config.rate_limit,
                window: self.config.rate_window,
            });
        }
        Ok(())
    }

    /// Takes a concurrency slot for the tenant.
    ///
    /// The counter is incremented atomically; its expiry is set only when the
    /// key has none, so a slot leaked by a crashed instance is reclaimed after
    /// `slot_ttl`. When the count exceeds the limit the increment is rolled
    /// back before rejecting.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::ConcurrencyLimitExceeded`] when the tenant is
    /// at its limit and [`AdmissionError::StoreUnavailable`] when the store
    /// fails.
    pub async fn acquire_slot(&self, tenant_id: &str) -> Result<ConcurrencySlot, AdmissionError> {
        let key = format!("{CONCURRENCY_PREFIX}{tenant_id}");
        let count = self
            .store
            .increment(&key, Expiry::IfUnset(self.config.slot_ttl))
            .await
            .map_err(|source| {
                tracing::error!(tenant_id, error = %source, "Concurrency gate store failure");
                AdmissionError::StoreUnavailable {
                    gate: Gate::Concurrency,
                    source,
                }
            })?;

        if count > i64::from(self.config.max_concurrent) {
            if let Err(e) = self.store.decrement(&key).await {
                tracing::error!(tenant_id, error = %e, "Failed to roll back rejected slot");
            }
            tracing::warn!(
                tenant_id,
                count,
                max = self.config.max_concurrent,
                "Concurrency limit exceeded"
            );
            return Err(AdmissionError::ConcurrencyLimitExceeded {
                max: self.config.max_concurrent,
            });
        }

        tracing::debug!(tenant_id, in_flight = count, "Concurrency slot acquired");
        Ok(ConcurrencySlot {
            store: Arc::clone(&self.store),
            key,
            released: false,
        })
    }
}

/// An acquired concurrency slot.
///
/// Call [`ConcurrencySlot::release`] when the query finishes. A slot dropped
/// without being released schedules the release on the current Tokio runtime;
/// if there is none, the slot is reclaimed when its counter expires.
#[must_use = "a slot holds a tenant's concurrency budget until released"]
pub struct ConcurrencySlot {
    store: Arc<dyn SharedStore>,
    key: String,
    released: bool,
}

impl std::fmt::Debug for ConcurrencySlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConcurrencySlot")
            .field("key", &self.key)
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}

impl ConcurrencySlot {
    /// Returns the counter key this slot was taken from.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Releases the slot.
    ///
    /// Store failures are logged rather than returned; the counter's expiry
    /// bounds the leak.
    pub async fn release(mut self) {
        self.released = true;
        if let Err(e) = self.store.decrement(&self.key).await {
            tracing::error!(key = %self.key, error = %e, "Failed to release concurrency slot");
        }
    }
}

impl Drop for ConcurrencySlot {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let store = Arc::clone(&self.store);
        let key = std::mem::take(&mut self.key);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = store.decrement(&key).await {
                        tracing::error!(key = %key, error = %e, "Failed to release dropped slot");
                    }
                });
            }
            Err(_) => {
                tracing::warn!(key = %key, "Slot dropped outside a runtime; left to expire");
            }
        }
    }
}

//! Shared counter/cache store.
//!
//! Admission control and result caching coordinate through a key-value store
//! that every service instance can reach. The [`SharedStore`] trait is the
//! contract; [`RedisStore`] is the distributed implementation and
//! [`InMemoryStore`] serves single-process deployments and tests.
//!
//! Every operation is a single atomic round trip. Callers never combine a
//! read and a write to emulate an increment.

mod memory;
mod redis;

pub use self::memory::InMemoryStore;
pub use self::redis::{RedisConfig, RedisStore};

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not be reached or the command failed.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A command did not complete within the configured timeout.
    #[error("Store command timed out after {0:?}")]
    Timeout(Duration),

    /// A counter operation hit a key holding a non-integer value.
    #[error("Key '{0}' does not hold an integer")]
    NotAnInteger(String),
}

/// Expiry behaviour applied atomically with an increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// Leave any existing expiry untouched.
    Keep,
    /// (Re)set the expiry on every increment.
    Refresh(Duration),
    /// Set the expiry only if the key currently has none.
    IfUnset(Duration),
}

/// Key-value store shared by all service instances.
///
/// Implementations must be thread-safe (Send + Sync) and safe to use from
/// many processes at once.
#[async_trait]
pub trait SharedStore: Send + Sync {
    /// Returns the value stored at `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be reached.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Stores `value` at `key`, expiring after `ttl`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be reached.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Increments the counter at `key` by one and applies `expiry`, returning
    /// the new value. A missing key counts from zero.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be reached or the key does not
    /// hold an integer.
    async fn increment(&self, key: &str, expiry: Expiry) -> Result<i64, StoreError>;

    /// Decrements the counter at `key` by one, returning the new value.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be reached or the key does not
    /// hold an integer.
    async fn decrement(&self, key: &str) -> Result<i64, StoreError>;
}

//! In-process implementation of [`SharedStore`].

use super::{Expiry, SharedStore, StoreError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

/// Writes between sweeps of expired keys.
const PURGE_INTERVAL: usize = 256;

/// Expiry used when a TTL does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

fn deadline_after(now: Instant, ttl: Duration) -> Instant {
    now.checked_add(ttl).unwrap_or_else(|| now + FAR_FUTURE)
}

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

/// In-memory store with per-key expiry.
///
/// State is local to the process, so this is only correct for a single
/// service instance. Expiry is measured with `tokio::time`, which lets tests
/// pause and advance the clock. Expired keys are dropped when read, and every
/// few hundred writes the whole map is swept.
///
/// # Example
///
/// ```
/// use shared::store::{Expiry, InMemoryStore, SharedStore};
/// use std::time::Duration;
///
/// # tokio_test::block_on(async {
/// let store = InMemoryStore::new();
/// assert_eq!(store.increment("hits", Expiry::Keep).await.unwrap(), 1);
/// assert_eq!(store.increment("hits", Expiry::Keep).await.unwrap(), 2);
///
/// store.set("greeting", "hello", Duration::from_secs(30)).await.unwrap();
/// assert_eq!(store.get("greeting").await.unwrap().as_deref(), Some("hello"));
/// # });
/// ```
#[derive(Debug, Default, Clone)]
pub struct InMemoryStore {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
    writes: Arc<AtomicUsize>,
}

impl InMemoryStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new store wrapped in an Arc.
    #[must_use]
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Returns the number of live keys.
    #[must_use]
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.lock().values().filter(|e| e.is_live(now)).count()
    }

    /// Returns true if the store holds no live keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the remaining time to live of `key`, if it exists and expires.
    #[must_use]
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let now = Instant::now();
        self.lock()
            .get(key)
            .filter(|e| e.is_live(now))
            .and_then(|e| e.expires_at)
            .map(|at| at - now)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        // A poisoned map is still structurally valid; every write is a single insert.
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Number of stored keys, expired or not.
    #[cfg(test)]
    fn stored(&self) -> usize {
        self.lock().len()
    }

    fn insert(&self, entries: &mut HashMap<String, Entry>, key: &str, entry: Entry, now: Instant) {
        entries.insert(key.to_string(), entry);
        if self.writes.fetch_add(1, Ordering::Relaxed) % PURGE_INTERVAL == PURGE_INTERVAL - 1 {
            entries.retain(|_, e| e.is_live(now));
        }
    }

    fn add(&self, key: &str, delta: i64, expiry: Expiry) -> Result<i64, StoreError> {
        let now = Instant::now();
        let mut entries = self.lock();

        let current = entries.get(key).filter(|e| e.is_live(now)).cloned();
        let (count, expires_at) = match current {
            Some(entry) => {
                let count = entry
                    .value
                    .parse::<i64>()
                    .map_err(|_| StoreError::NotAnInteger(key.to_string()))?;
                (count, entry.expires_at)
            }
            None => (0, None),
        };

        let count = count.saturating_add(delta);
        let expires_at = match expiry {
            Expiry::Keep => expires_at,
            Expiry::Refresh(ttl) => Some(deadline_after(now, ttl)),
            Expiry::IfUnset(ttl) => expires_at.or(Some(deadline_after(now, ttl))),
        };

        self.insert(
            &mut entries,
            key,
            Entry {
                value: count.to_string(),
                expires_at,
            },
            now,
        );
        Ok(count)
    }
}

#[async_trait]
impl SharedStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = Instant::now();
        let mut entries = self.lock();
        match entries.get(key) {
            Some(entry) if entry.is_live(now) => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let now = Instant::now();
        let mut entries = self.lock();
        self.insert(
            &mut entries,
            key,
            Entry {
                value: value.to_string(),
                expires_at: Some(deadline_after(now, ttl)),
            },
            now,
        );
        Ok(())
    }

    async fn increment(&self, key: &str, expiry: Expiry) -> Result<i64, StoreError> {
        self.add(key, 1, expiry)
    }

    async fn decrement(&self, key: &str) -> Result<i64, StoreError> {
        self.add(key, -1, Expiry::Keep)
    }
}

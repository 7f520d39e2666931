//! Redis implementation of [`SharedStore`].
//!
//! Counters use `INCR` and `EXPIRE` inside a `MULTI`/`EXEC` pipeline so the
//! increment and its expiry land in one round trip. `Expiry::IfUnset` relies
//! on `EXPIRE ... NX`, which requires Redis 7 or newer.

use super::{Expiry, SharedStore, StoreError};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use std::future::Future;
use std::time::Duration;

/// Configuration for the Redis store.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Connection URL (e.g. `redis://localhost:6379`).
    pub url: String,
    /// Timeout applied to connecting and to every command.
    pub command_timeout: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            command_timeout: Duration::from_millis(500),
        }
    }
}

impl RedisConfig {
    /// Creates a config for `url` with the default command timeout.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }
}

/// Shared store backed by a multiplexed Redis connection.
///
/// The connection is cheap to clone and every command runs on its own clone,
/// so the store can be shared freely across tasks.
#[derive(Clone)]
pub struct RedisStore {
    conn: MultiplexedConnection,
    command_timeout: Duration,
}

impl std::fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisStore")
            .field("command_timeout", &self.command_timeout)
            .finish_non_exhaustive()
    }
}

impl RedisStore {
    /// Connects to Redis.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the server cannot be reached
    /// within the command timeout.
    pub async fn connect(config: &RedisConfig) -> Result<Self, StoreError> {
        let client = redis::Client::open(config.url.as_str()).map_err(|e| safe_error(&e))?;

        let conn = tokio::time::timeout(
            config.command_timeout,
            client.get_multiplexed_async_connection(),
        )
        .await
        .map_err(|_| StoreError::Timeout(config.command_timeout))?
        .map_err(|e| safe_error(&e))?;

        tracing::info!(timeout_ms = config.command_timeout.as_millis(), "Connected to Redis");

        Ok(Self {
            conn,
            command_timeout: config.command_timeout,
        })
    }

    /// Sends a `PING` to verify the connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the server does not answer.
    pub async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        self.bounded(async move { redis::cmd("PING").query_async::<String>(&mut conn).await })
            .await
            .map(|_| ())
    }

    async fn bounded<T, F>(&self, command: F) -> Result<T, StoreError>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        tokio::time::timeout(self.command_timeout, command)
            .await
            .map_err(|_| StoreError::Timeout(self.command_timeout))?
            .map_err(|e| safe_error(&e))
    }
}

/// Converts a Redis error into a store error without echoing connection
/// details such as credentials.
fn safe_error(err: &redis::RedisError) -> StoreError {
    if err.kind() == redis::ErrorKind::ResponseError
        && err.detail().is_some_and(|d| d.contains("not an integer"))
    {
        return StoreError::NotAnInteger(String::new());
    }
    StoreError::Unavailable(err.category().to_string())
}

fn ttl_secs(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_secs().max(1)).unwrap_or(i64::MAX)
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis().max(1)).unwrap_or(u64::MAX)
}

fn with_key(err: StoreError, key: &str) -> StoreError {
    match err {
        StoreError::NotAnInteger(_) => StoreError::NotAnInteger(key.to_string()),
        other => other,
    }
}

#[async_trait]
impl SharedStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        self.bounded(async move {
            redis::cmd("GET")
                .arg(key)
                .query_async::<Option<String>>(&mut conn)
                .await
        })
        .await
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        self.bounded(async move {
            redis::cmd("SET")
                .arg(key)
                .arg(value)
                .arg("PX")
                .arg(ttl_millis(ttl))
                .query_async::<()>(&mut conn)
                .await
        })
        .await
    }

    async fn increment(&self, key: &str, expiry: Expiry) -> Result<i64, StoreError> {
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic().cmd("INCR").arg(key);

        match expiry {
            Expiry::Keep => {}
            Expiry::Refresh(ttl) => {
                pipe.cmd("EXPIRE").arg(key).arg(ttl_secs(ttl)).ignore();
            }
            Expiry::IfUnset(ttl) => {
                pipe.cmd("EXPIRE")
                    .arg(key)
                    .arg(ttl_secs(ttl))
                    .arg("NX")
                    .ignore();
            }
        }

        let (count,) = self
            .bounded(async move { pipe.query_async::<(i64,)>(&mut conn).await })
            .await
            .map_err(|e| with_key(e, key))?;
        Ok(count)
    }

    async fn decrement(&self, key: &str) -> Result<i64, StoreError> {
        let mut conn = self.conn.clone();
        self.bounded(async move {
            redis::cmd("DECR")
                .arg(key)
                .query_async::<i64>(&mut conn)
                .await
        })
        .await
        .map_err(|e| with_key(e, key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn redis_url() -> String {
        std::env::var("LOGSIFT_REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string())
    }

    #[test]
    fn test_default_config() {
        let config = RedisConfig::default();
        assert_eq!(config.url, "redis://localhost:6379");
        assert_eq!(config.command_timeout, Duration::from_millis(500));
    }

    #[test]
    fn test_ttl_conversions_round_up_to_minimum() {
        assert_eq!(ttl_secs(Duration::from_millis(200)), 1);
        assert_eq!(ttl_secs(Duration::from_secs(60)), 60);
        assert_eq!(ttl_millis(Duration::from_secs(30)), 30_000);
        assert_eq!(ttl_millis(Duration::ZERO), 1);
    }

    #[tokio::test]
    async fn test_connect_invalid_url() {
        let config = RedisConfig::new("not-a-url");
        assert!(RedisStore::connect(&config).await.is_err());
    }

    #[tokio::test]
    #[ignore = "requires a running Redis 7 server"]
    async fn test_increment_with_expiry() {
        let store = RedisStore::connect(&RedisConfig::new(redis_url()))
            .await
            .unwrap();
        let key = format!("logsift_test:{}", std::process::id());

        let first = store
            .increment(&key, Expiry::IfUnset(Duration::from_secs(5)))
            .await
            .unwrap();
        let second = store
            .increment(&key, Expiry::IfUnset(Duration::from_secs(5)))
            .await
            .unwrap();
        assert_eq!(second, first + 1);
        assert_eq!(store.decrement(&key).await.unwrap(), first);
    }

    #[tokio::test]
    #[ignore = "requires a running Redis server"]
    async fn test_set_and_get() {
        let store = RedisStore::connect(&RedisConfig::new(redis_url()))
            .await
            .unwrap();
        store.ping().await.unwrap();

        let key = format!("logsift_test_cache:{}", std::process::id());
        store.set(&key, "payload", Duration::from_secs(5)).await.unwrap();
        assert_eq!(store.get(&key).await.unwrap().as_deref(), Some("payload"));
    }
}

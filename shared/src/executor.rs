//! Row-store query execution.
//!
//! The [`QueryExecutor`] trait runs a compiled, parameterized statement and
//! returns the rows as a JSON array. [`ClickHouseExecutor`] is the production
//! implementation; [`StaticExecutor`] returns a fixed payload and records
//! every call.

use crate::query::{CompiledQuery, SqlArg};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/// Errors that can occur while executing a query.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutorError {
    /// The deadline passed before or during execution.
    #[error("Query deadline exceeded")]
    DeadlineExceeded,

    /// The backend rejected or failed the query.
    #[error("Backend error: {0}")]
    Backend(String),

    /// The backend answered with rows that could not be decoded.
    #[error("Failed to decode result rows: {0}")]
    Decode(String),
}

/// Runs compiled queries against a row store.
///
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Executes `query`, finishing before `deadline`, and returns the rows
    /// encoded as a JSON array.
    ///
    /// # Errors
    ///
    /// Returns an error if the deadline has passed, the backend fails, or the
    /// rows cannot be decoded.
    async fn execute(&self, query: &CompiledQuery, deadline: Instant)
        -> Result<String, ExecutorError>;
}

/// Executor backed by `ClickHouse`.
///
/// Placeholders are bound with the client's `?` binding, timestamps as
/// nanoseconds since the epoch to match the `logs` table layout. The
/// remaining time before the deadline is passed to the server as
/// `max_execution_time`.
#[derive(Clone)]
pub struct ClickHouseExecutor {
    client: Arc<clickhouse::Client>,
}

impl std::fmt::Debug for ClickHouseExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClickHouseExecutor").finish_non_exhaustive()
    }
}

impl ClickHouseExecutor {
    /// Creates an executor using the given client.
    #[must_use]
    pub fn new(client: Arc<clickhouse::Client>) -> Self {
        Self { client }
    }

    /// Creates an executor wrapped in an Arc.
    #[must_use]
    pub fn new_shared(client: Arc<clickhouse::Client>) -> Arc<Self> {
        Arc::new(Self::new(client))
    }
}

#[async_trait]
impl QueryExecutor for ClickHouseExecutor {
    async fn execute(
        &self,
        query: &CompiledQuery,
        deadline: Instant,
    ) -> Result<String, ExecutorError> {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(ExecutorError::DeadlineExceeded);
        }

        let mut statement = self
            .client
            .query(&query.sql)
            .with_option("max_execution_time", execution_secs(remaining).to_string());

        for arg in &query.args {
            statement = match arg {
                SqlArg::Text(value) => statement.bind(value.as_str()),
                SqlArg::Timestamp(ts) => statement.bind(ts.timestamp_nanos_opt().unwrap_or(0)),
            };
        }

        let fetch = async move {
            let mut cursor = statement.fetch_bytes("JSONEachRow")?;
            let mut body = Vec::new();
            while let Some(chunk) = cursor.next().await? {
                body.extend_from_slice(&chunk);
            }
            Ok::<_, clickhouse::error::Error>(body)
        };

        let body = tokio::time::timeout_at(deadline, fetch)
            .await
            .map_err(|_| ExecutorError::DeadlineExceeded)?
            .map_err(|e| ExecutorError::Backend(e.to_string()))?;

        rows_to_json_array(&body)
    }
}

fn execution_secs(remaining: Duration) -> u64 {
    let secs = remaining.as_secs();
    if remaining.subsec_nanos() > 0 {
        secs.saturating_add(1)
    } else {
        secs.max(1)
    }
}

/// Re-encodes newline-delimited JSON rows as a single JSON array.
///
/// # Errors
///
/// Returns [`ExecutorError::Decode`] if the body is not UTF-8 or a line is
/// not valid JSON.
pub fn rows_to_json_array(body: &[u8]) -> Result<String, ExecutorError> {
    let text = std::str::from_utf8(body).map_err(|e| ExecutorError::Decode(e.to_string()))?;

    let rows = text
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(serde_json::from_str::<serde_json::Value>)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ExecutorError::Decode(e.to_string()))?;

    serde_json::to_string(&rows).map_err(|e| ExecutorError::Decode(e.to_string()))
}

#[derive(Debug, Clone)]
enum Reply {
    Payload(String),
    Failure(String),
}

/// Executor that returns a fixed reply.
///
/// Useful for development without a database and for tests. Every call is
/// recorded and can be inspected with [`StaticExecutor::calls`].
#[derive(Debug)]
pub struct StaticExecutor {
    reply: Reply,
    delay: Option<Duration>,
    calls: Mutex<Vec<CompiledQuery>>,
}

impl Default for StaticExecutor {
    fn default() -> Self {
        Self::new("[]")
    }
}

impl StaticExecutor {
    /// Creates an executor that always returns `payload`.
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            reply: Reply::Payload(payload.into()),
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Creates an executor that always fails with a backend error.
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            reply: Reply::Failure(message.into()),
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Makes every call take `delay` before replying.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Returns the queries executed so far.
    #[must_use]
    pub fn calls(&self) -> Vec<CompiledQuery> {
        self.calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Returns the number of queries executed so far.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }
}

#[async_trait]
impl QueryExecutor for StaticExecutor {
    async fn execute(
        &self,
        query: &CompiledQuery,
        deadline: Instant,
    ) -> Result<String, ExecutorError> {
        self.calls
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(query.clone());

        if let Some(delay) = self.delay {
            tokio::time::timeout_at(deadline, tokio::time::sleep(delay))
                .await
                .map_err(|_| ExecutorError::DeadlineExceeded)?;
        }

        match &self.reply {
            Reply::Payload(payload) => Ok(payload.clone()),
            Reply::Failure(message) => Err(ExecutorError::Backend(message.clone())),
        }
    }
}

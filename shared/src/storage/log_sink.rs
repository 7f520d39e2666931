//! Log sink trait and implementations.
//!
//! Provides the `LogSink` trait for writing ingested log records, an
//! `InMemoryLogSink` for development and testing, and a `ClickHouseLogSink`
//! for production.

use crate::models::LogRecord;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;

/// Errors that can occur during log sink operations.
#[derive(Debug, Error)]
pub enum LogSinkError {
    /// Failed to acquire lock on the sink.
    #[error("Failed to acquire lock on log sink")]
    LockError,

    /// Generic storage error.
    #[error("Storage error: {0}")]
    StorageError(String),
}

/// Destination for ingested log records.
///
/// Implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait LogSink: Send + Sync {
    /// Writes a batch of records.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn write_batch(&self, records: Vec<LogRecord>) -> Result<(), LogSinkError>;
}

/// In-memory log sink.
///
/// Records are kept in a `Vec` protected by a `RwLock`. Data is not persisted
/// across restarts.
///
/// # Example
///
/// ```
/// use shared::models::LogRecord;
/// use shared::storage::{InMemoryLogSink, LogSink};
///
/// # tokio_test::block_on(async {
/// let sink = InMemoryLogSink::new();
/// sink.write_batch(vec![LogRecord::new("INFO", "api", "up").stamp("t1")])
///     .await
///     .unwrap();
/// assert_eq!(sink.count().unwrap(), 1);
/// # });
/// ```
#[derive(Debug, Default)]
pub struct InMemoryLogSink {
    records: Arc<RwLock<Vec<LogRecord>>>,
}

impl InMemoryLogSink {
    /// Creates a new empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new sink wrapped in an Arc.
    #[must_use]
    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Returns the number of records written.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn count(&self) -> Result<usize, LogSinkError> {
        let records = self.records.read().map_err(|_| LogSinkError::LockError)?;
        Ok(records.len())
    }

    /// Returns the records written for `tenant_id`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn records_for(&self, tenant_id: &str) -> Result<Vec<LogRecord>, LogSinkError> {
        let records = self.records.read().map_err(|_| LogSinkError::LockError)?;
        Ok(records
            .iter()
            .filter(|r| r.org_id == tenant_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl LogSink for InMemoryLogSink {
    async fn write_batch(&self, records: Vec<LogRecord>) -> Result<(), LogSinkError> {
        let mut stored = self.records.write().map_err(|_| LogSinkError::LockError)?;
        stored.extend(records);
        Ok(())
    }
}

#[derive(clickhouse::Row, serde::Serialize)]
struct LogRow {
    timestamp: i64,
    org_id: String,
    level: String,
    service: String,
    message: String,
    attributes: HashMap<String, String>,
}

impl From<LogRecord> for LogRow {
    fn from(record: LogRecord) -> Self {
        // Map(String, String) column; JSON strings are stored unquoted.
        let attributes = record
            .attributes
            .into_iter()
            .map(|(k, v)| match v {
                serde_json::Value::String(s) => (k, s),
                other => (k, other.to_string()),
            })
            .collect();

        Self {
            timestamp: record.timestamp.timestamp_nanos_opt().unwrap_or(0),
            org_id: record.org_id,
            level: record.level,
            service: record.service,
            message: record.message,
            attributes,
        }
    }
}

/// `ClickHouse`-backed log sink.
///
/// Inserts into the `logs` table with timestamps as nanoseconds since the
/// epoch.
#[derive(Clone)]
pub struct ClickHouseLogSink {
    client: Arc<clickhouse::Client>,
    table: String,
}

impl std::fmt::Debug for ClickHouseLogSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClickHouseLogSink")
            .field("table", &self.table)
            .finish_non_exhaustive()
    }
}

impl ClickHouseLogSink {
    /// Creates a sink writing to `table`.
    #[must_use]
    pub fn new(client: Arc<clickhouse::Client>, table: impl Into<String>) -> Self {
        Self {
            client,
            table: table.into(),
        }
    }

    /// Creates a sink wrapped in an Arc.
    #[must_use]
    pub fn new_shared(client: Arc<clickhouse::Client>, table: impl Into<String>) -> Arc<Self> {
        Arc::new(Self::new(client, table))
    }
}

#[async_trait]
impl LogSink for ClickHouseLogSink {
    async fn write_batch(&self, records: Vec<LogRecord>) -> Result<(), LogSinkError> {
        if records.is_empty() {
            return Ok(());
        }

        let insert = async {
            let mut inserter = self.client.insert::<LogRow>(&self.table).await?;
            for record in records {
                inserter.write(&LogRow::from(record)).await?;
            }
            inserter.end().await
        };

        insert
            .await
            .map_err(|e: clickhouse::error::Error| LogSinkError::StorageError(e.to_string()))
    }
}

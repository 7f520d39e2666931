//! `ClickHouse` client setup and log table schema.
//!
//! The query executor and the ingestion sink share one client. The log table
//! stores the fixed columns directly; the other searchable fields are `ALIAS`
//! columns over the `attributes` map so compiled queries can filter, group and
//! sort on them by name.

use anyhow::{bail, Context, Result};
use clickhouse::Client;
use shared::query::is_identifier;
use std::sync::Arc;

/// Connection settings for `ClickHouse`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    /// HTTP endpoint, e.g. <http://localhost:8123>.
    pub url: String,
    /// Database name.
    pub database: String,
    /// User name.
    pub user: String,
    /// Password.
    pub password: String,
}

impl DatabaseConfig {
    /// Reads `LOGSIFT_DB_URL`, `LOGSIFT_DB_NAME`, `LOGSIFT_DB_USER` and
    /// `LOGSIFT_DB_PASSWORD`, falling back to local development defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`DatabaseConfig::from_env`], reading variables through `lookup`.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |name: &str, default: &str| lookup(name).unwrap_or_else(|| default.to_string());
        Self {
            url: var("LOGSIFT_DB_URL", "http://localhost:8123"),
            database: var("LOGSIFT_DB_NAME", "logsift"),
            user: var("LOGSIFT_DB_USER", "logsift"),
            password: var("LOGSIFT_DB_PASSWORD", "logsift_dev"),
        }
    }
}

/// DDL for the log table.
///
/// `timestamp` holds nanoseconds, matching what the sink inserts and what the
/// executor binds for time bounds.
///
/// # Errors
///
/// Returns an error if `table` is not a plain identifier.
pub fn log_table_ddl(table: &str) -> Result<String> {
    if !is_identifier(table) {
        bail!("table name '{table}' is not a plain identifier");
    }

    Ok(format!(
        "CREATE TABLE IF NOT EXISTS {table} (
    timestamp DateTime64(9),
    org_id LowCardinality(String),
    level LowCardinality(String),
    service LowCardinality(String),
    message String,
    attributes Map(String, String),
    host String ALIAS attributes['host'],
    user String ALIAS attributes['user'],
    trace_id String ALIAS attributes['trace_id'],
    span_id String ALIAS attributes['span_id'],
    status String ALIAS attributes['status'],
    latency Float64 ALIAS toFloat64OrZero(attributes['latency'])
)
ENGINE = MergeTree
PARTITION BY toDate(timestamp)
ORDER BY (org_id, timestamp)"
    ))
}

/// Shared `ClickHouse` client.
#[derive(Clone)]
pub struct Database {
    client: Arc<Client>,
}

impl Database {
    /// Builds a client. No connection is made until the first request.
    ///
    /// # Examples
    ///
    /// ```
    /// # use api::db::{Database, DatabaseConfig};
    /// let db = Database::new(&DatabaseConfig::from_env());
    /// let _client = db.client();
    /// ```
    #[must_use]
    pub fn new(config: &DatabaseConfig) -> Self {
        let client = Client::default()
            .with_url(&config.url)
            .with_database(&config.database)
            .with_user(&config.user)
            .with_password(&config.password);

        Self {
            client: Arc::new(client),
        }
    }

    /// Returns the shared client.
    #[must_use]
    pub fn client(&self) -> Arc<Client> {
        Arc::clone(&self.client)
    }

    /// Checks that the server answers `SELECT 1`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be reached.
    pub async fn ping(&self) -> Result<()> {
        self.client
            .query("SELECT 1")
            .fetch_one::<u8>()
            .await
            .context("Failed to ping database")?;
        Ok(())
    }

    /// Creates the log table if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the table name is invalid or the DDL fails.
    pub async fn ensure_log_table(&self, table: &str) -> Result<()> {
        let ddl = log_table_ddl(table)?;
        self.client
            .query(&ddl)
            .execute()
            .await
            .with_context(|| format!("Failed to create log table '{table}'"))?;
        tracing::info!(table, "Log table ready");
        Ok(())
    }
}

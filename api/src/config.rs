//! Server configuration module.
//!
//! Handles loading configuration from environment variables with sensible defaults.

use anyhow::{bail, Context, Result};
use shared::admission::AdmissionConfig;
use shared::pipeline::PipelineConfig;
use shared::query::{is_identifier, FieldVocabulary};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Which executor answers queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryBackend {
    /// Run compiled SQL against `ClickHouse`.
    ClickHouse,
    /// Return an empty result set; for local development without a database.
    Static,
}

impl FromStr for QueryBackend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "clickhouse" => Ok(Self::ClickHouse),
            "static" => Ok(Self::Static),
            other => bail!("unknown query backend '{other}' (expected clickhouse or static)"),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable output.
    #[default]
    Pretty,
    /// One JSON object per event.
    Json,
}

impl LogFormat {
    /// Reads `LOGSIFT_LOG_FORMAT`; anything other than `json` is pretty.
    #[must_use]
    pub fn from_env() -> Self {
        match std::env::var("LOGSIFT_LOG_FORMAT") {
            Ok(v) if v.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Pretty,
        }
    }
}

/// Server configuration.
///
/// Configuration values can be set via environment variables:
/// - `LOGSIFT_HOST`: The host address to bind to (default: "0.0.0.0")
/// - `LOGSIFT_PORT`: The port to listen on (default: 8080)
/// - `LOGSIFT_REDIS_URL`: Shared store URL; unset means an in-process store
/// - `LOGSIFT_REDIS_TIMEOUT_MS`: Per-command store timeout (default: 500)
/// - `LOGSIFT_QUERY_BACKEND`: `clickhouse` or `static` (default: clickhouse)
/// - `LOGSIFT_LOG_TABLE`: Table queried and ingested into (default: "logs")
/// - `LOGSIFT_RATE_LIMIT`: Requests per tenant per second (default: 100)
/// - `LOGSIFT_MAX_CONCURRENT_QUERIES`: In-flight queries per tenant (default: 5)
/// - `LOGSIFT_QUERY_TIMEOUT_SECS`: Query deadline (default: 30)
/// - `LOGSIFT_CACHE_TTL_SECS`: Result cache TTL (default: 30)
/// - `LOGSIFT_QUERY_FIELDS`: Comma-separated searchable fields
/// - `LOGSIFT_POLICY_FILE`: JSON access policy
/// - `LOGSIFT_INGEST_QUEUE_CAPACITY`: Pending ingestion batches (default: 1024)
#[derive(Debug, Clone)]
pub struct Config {
    /// The host address to bind to.
    pub host: String,
    /// The port to listen on.
    pub port: u16,
    /// Redis URL for the shared store.
    pub redis_url: Option<String>,
    /// Timeout for each shared store command.
    pub redis_timeout: Duration,
    /// Query executor backend.
    pub backend: QueryBackend,
    /// Log table name.
    pub table: String,
    /// Requests per tenant per second.
    pub rate_limit: u32,
    /// In-flight queries per tenant.
    pub max_concurrent: u32,
    /// Query deadline.
    pub query_timeout: Duration,
    /// Result cache TTL.
    pub cache_ttl: Duration,
    /// Searchable fields; `None` uses the built-in list.
    pub query_fields: Option<String>,
    /// Access policy file; `None` starts with no tokens.
    pub policy_file: Option<PathBuf>,
    /// Capacity of the ingestion queue, in batches.
    pub ingest_queue_capacity: usize,
}

/// Upper bound for the query timeout and cache TTL, in seconds.
const MAX_DURATION_SECS: u64 = 86_400;

impl Config {
    /// Creates a new configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but cannot be parsed, a duration
    /// exceeds one day, or the table name is not a plain identifier.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Creates a configuration reading variables through `lookup`.
    ///
    /// # Errors
    ///
    /// Same as [`Config::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let parse = |name: &str| -> Result<Option<u64>> {
            lookup(name)
                .map(|v| {
                    v.parse::<u64>()
                        .with_context(|| format!("{name} must be a non-negative integer, got '{v}'"))
                })
                .transpose()
        };
        let bounded = |name: &str, max: u64| -> Result<Option<u64>> {
            match parse(name)? {
                Some(v) if v > max => bail!("{name} must be at most {max}, got {v}"),
                other => Ok(other),
            }
        };

        let port = lookup("LOGSIFT_PORT")
            .map(|p| p.parse::<u16>())
            .transpose()
            .context("LOGSIFT_PORT must be a valid port number")?
            .unwrap_or(defaults.port);

        let backend = lookup("LOGSIFT_QUERY_BACKEND")
            .map(|b| b.parse())
            .transpose()?
            .unwrap_or(defaults.backend);

        let table = lookup("LOGSIFT_LOG_TABLE").unwrap_or(defaults.table);
        if !is_identifier(&table) {
            bail!("LOGSIFT_LOG_TABLE must be a plain identifier, got '{table}'");
        }

        let rate_limit = parse("LOGSIFT_RATE_LIMIT")?
            .map(u32::try_from)
            .transpose()
            .context("LOGSIFT_RATE_LIMIT is too large")?
            .unwrap_or(defaults.rate_limit);
        let max_concurrent = parse("LOGSIFT_MAX_CONCURRENT_QUERIES")?
            .map(u32::try_from)
            .transpose()
            .context("LOGSIFT_MAX_CONCURRENT_QUERIES is too large")?
            .unwrap_or(defaults.max_concurrent);

        let ingest_queue_capacity = parse("LOGSIFT_INGEST_QUEUE_CAPACITY")?
            .map(usize::try_from)
            .transpose()
            .context("LOGSIFT_INGEST_QUEUE_CAPACITY is too large")?
            .unwrap_or(defaults.ingest_queue_capacity);

        Ok(Self {
            host: lookup("LOGSIFT_HOST").unwrap_or(defaults.host),
            port,
            redis_url: lookup("LOGSIFT_REDIS_URL").filter(|u| !u.is_empty()),
            redis_timeout: bounded("LOGSIFT_REDIS_TIMEOUT_MS", MAX_DURATION_SECS * 1000)?
                .map_or(defaults.redis_timeout, Duration::from_millis),
            backend,
            table,
            rate_limit,
            max_concurrent,
            query_timeout: bounded("LOGSIFT_QUERY_TIMEOUT_SECS", MAX_DURATION_SECS)?
                .map_or(defaults.query_timeout, Duration::from_secs),
            cache_ttl: bounded("LOGSIFT_CACHE_TTL_SECS", MAX_DURATION_SECS)?
                .map_or(defaults.cache_ttl, Duration::from_secs),
            query_fields: lookup("LOGSIFT_QUERY_FIELDS").filter(|f| !f.trim().is_empty()),
            policy_file: lookup("LOGSIFT_POLICY_FILE").map(PathBuf::from),
            ingest_queue_capacity,
        })
    }

    /// Returns the socket address for binding.
    ///
    /// # Errors
    ///
    /// Returns an error if the host and port do not form a valid socket address.
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid socket address {}:{}", self.host, self.port))
    }

    /// Returns the admission limits.
    #[must_use]
    pub fn admission(&self) -> AdmissionConfig {
        AdmissionConfig {
            rate_limit: self.rate_limit,
            max_concurrent: self.max_concurrent,
            ..AdmissionConfig::default()
        }
    }

    /// Returns the pipeline settings.
    #[must_use]
    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            table: self.table.clone(),
            timeout: self.query_timeout,
            ..PipelineConfig::default()
        }
    }

    /// Returns the searchable field vocabulary.
    #[must_use]
    pub fn vocabulary(&self) -> FieldVocabulary {
        self.query_fields
            .as_deref()
            .map_or_else(FieldVocabulary::default, FieldVocabulary::from_csv)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            redis_url: None,
            redis_timeout: Duration::from_millis(500),
            backend: QueryBackend::ClickHouse,
            table: "logs".to_string(),
            rate_limit: 100,
            max_concurrent: 5,
            query_timeout: Duration::from_secs(30),
            cache_ttl: Duration::from_secs(30),
            query_fields: None,
            policy_file: None,
            ingest_queue_capacity: 1024,
        }
    }
}

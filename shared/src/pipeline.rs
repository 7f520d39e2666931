//! Query pipeline orchestration.
//!
//! [`QueryPipeline::execute`] runs one tenant query end to end under a single
//! deadline:
//!
//! 1. parse and check guardrails (no admission is consumed on failure);
//! 2. take a concurrency slot;
//! 3. look the fingerprint up in the result cache;
//! 4. on a miss, compile to SQL, run it, and queue the cache fill;
//! 5. release the slot, whatever the outcome.
//!
//! The rate gate is applied earlier, at the transport edge.

use crate::admission::{AdmissionController, AdmissionError};
use crate::cache::ResultCache;
use crate::executor::{ExecutorError, QueryExecutor};
use crate::query::{fingerprint, to_sql, CompiledQuery, ParseError, Query, QueryParser};
use crate::tasks::{BackgroundQueue, QueueStats};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;

/// Deadline used when the configured timeout does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// Default table queried by compiled statements.
pub const DEFAULT_TABLE: &str = "logs";

/// Default capacity of the cache write queue.
pub const DEFAULT_CACHE_QUEUE_CAPACITY: usize = 1024;

/// Errors that end a query.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The query text could not be parsed or violated a guardrail.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// The tenant was not admitted.
    #[error(transparent)]
    Admission(#[from] AdmissionError),

    /// The deadline passed before the query completed.
    #[error("Query exceeded the {0:?} deadline")]
    Timeout(Duration),

    /// The executor failed.
    #[error("Query execution failed: {0}")]
    Executor(ExecutorError),
}

impl PipelineError {
    /// Short label used for metrics and audit records.
    #[must_use]
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::Parse(ParseError::Guardrail(_)) => "guardrail_violation",
            Self::Parse(_) => "parse_error",
            Self::Admission(e) => match e.gate() {
                crate::admission::Gate::Rate => "rate_limited",
                crate::admission::Gate::Concurrency => "concurrency_limited",
            },
            Self::Timeout(_) => "timeout",
            Self::Executor(_) => "executor_error",
        }
    }
}

/// Whether a result came from the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStatus {
    /// Served from the result cache.
    Hit,
    /// Computed by the executor.
    Miss,
}

impl CacheStatus {
    /// Lowercase label (`hit` / `miss`).
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hit => "hit",
            Self::Miss => "miss",
        }
    }

    /// Value for the `X-Cache` response header.
    #[must_use]
    pub fn header_value(self) -> &'static str {
        match self {
            Self::Hit => "HIT",
            Self::Miss => "MISS",
        }
    }
}

impl std::fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A query submitted on behalf of a tenant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRequest {
    /// Authenticated tenant.
    pub tenant_id: String,
    /// Query text in the search language.
    pub query: String,
}

impl QueryRequest {
    /// Creates a request.
    pub fn new(tenant_id: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            query: query.into(),
        }
    }
}

/// The result of a successful query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryOutcome {
    /// Rows as a JSON array.
    pub payload: String,
    /// Whether the payload came from the cache.
    pub cache: CacheStatus,
    /// Cache fingerprint of the query.
    pub fingerprint: String,
    /// Statement sent to the executor; `None` on a cache hit.
    pub compiled: Option<CompiledQuery>,
}

/// Settings for a [`QueryPipeline`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Table compiled statements read from. Must be a plain identifier.
    pub table: String,
    /// Deadline applied to each query from acceptance.
    pub timeout: Duration,
    /// Capacity of the background cache write queue.
    pub cache_queue_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            table: DEFAULT_TABLE.to_string(),
            timeout: crate::query::DEFAULT_TIMEOUT,
            cache_queue_capacity: DEFAULT_CACHE_QUEUE_CAPACITY,
        }
    }
}

#[derive(Debug)]
struct CacheWrite {
    fingerprint: String,
    payload: String,
}

/// Orchestrates parsing, admission, caching and execution of tenant queries.
pub struct QueryPipeline {
    parser: QueryParser,
    admission: AdmissionController,
    cache: ResultCache,
    executor: Arc<dyn QueryExecutor>,
    cache_writes: BackgroundQueue<CacheWrite>,
    config: PipelineConfig,
}

impl std::fmt::Debug for QueryPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryPipeline")
            .field("admission", &self.admission)
            .field("cache", &self.cache)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl QueryPipeline {
    /// Creates a pipeline and starts its cache write worker.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn new(
        parser: QueryParser,
        admission: AdmissionController,
        cache: ResultCache,
        executor: Arc<dyn QueryExecutor>,
        config: PipelineConfig,
    ) -> Self {
        let writer = cache.clone();
        let cache_writes = BackgroundQueue::spawn(
            "cache_writes",
            config.cache_queue_capacity,
            move |write: CacheWrite| {
                let cache = writer.clone();
                async move { cache.set(&write.fingerprint, &write.payload).await }
            },
        );

        Self {
            parser,
            admission,
            cache,
            executor,
            cache_writes,
            config,
        }
    }

    /// Returns the admission controller.
    #[must_use]
    pub fn admission(&self) -> &AdmissionController {
        &self.admission
    }

    /// Returns the pipeline settings.
    #[must_use]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Runs a query with the configured timeout.
    ///
    /// # Errors
    ///
    /// Returns a [`PipelineError`] describing the first stage that failed.
    pub async fn execute(&self, request: &QueryRequest) -> Result<QueryOutcome, PipelineError> {
        let now = Instant::now();
        let deadline = now
            .checked_add(self.config.timeout)
            .unwrap_or_else(|| now + FAR_FUTURE);
        self.execute_until(request, deadline).await
    }

    /// Runs a query that must finish by `deadline`.
    ///
    /// # Errors
    ///
    /// Returns a [`PipelineError`] describing the first stage that failed.
    pub async fn execute_until(
        &self,
        request: &QueryRequest,
        deadline: Instant,
    ) -> Result<QueryOutcome, PipelineError> {
        let tenant_id = request.tenant_id.as_str();
        let started = Instant::now();

        let query = self.parser.parse(&request.query)?;

        let slot = tokio::time::timeout_at(deadline, self.admission.acquire_slot(tenant_id))
            .await
            .map_err(|_| PipelineError::Timeout(self.config.timeout))??;

        let result = tokio::time::timeout_at(deadline, self.run_admitted(&query, tenant_id, deadline))
            .await
            .unwrap_or(Err(PipelineError::Timeout(self.config.timeout)));

        slot.release().await;

        match &result {
            Ok(outcome) => tracing::info!(
                tenant_id,
                fingerprint = %outcome.fingerprint,
                cache = %outcome.cache,
                elapsed_ms = started.elapsed().as_millis(),
                "Query completed"
            ),
            Err(e) => tracing::warn!(
                tenant_id,
                outcome = e.outcome(),
                error = %e,
                elapsed_ms = started.elapsed().as_millis(),
                "Query failed"
            ),
        }
        result
    }

    async fn run_admitted(
        &self,
        query: &Query,
        tenant_id: &str,
        deadline: Instant,
    ) -> Result<QueryOutcome, PipelineError> {
        let fingerprint = fingerprint(query, tenant_id);

        if let Some(payload) = self.cache.get(&fingerprint).await {
            return Ok(QueryOutcome {
                payload,
                cache: CacheStatus::Hit,
                fingerprint,
                compiled: None,
            });
        }

        let compiled = to_sql(query, &self.config.table, tenant_id);
        tracing::debug!(tenant_id, sql = %compiled.sql, args = compiled.args.len(), "Compiled query");

        if Instant::now() >= deadline {
            return Err(PipelineError::Timeout(self.config.timeout));
        }

        let payload = self
            .executor
            .execute(&compiled, deadline)
            .await
            .map_err(|e| match e {
                ExecutorError::DeadlineExceeded => PipelineError::Timeout(self.config.timeout),
                other => PipelineError::Executor(other),
            })?;

        if let Err(e) = self.cache_writes.try_enqueue(CacheWrite {
            fingerprint: fingerprint.clone(),
            payload: payload.clone(),
        }) {
            tracing::warn!(fingerprint = %fingerprint, error = %e, "Skipping cache fill");
        }

        Ok(QueryOutcome {
            payload,
            cache: CacheStatus::Miss,
            fingerprint,
            compiled: Some(compiled),
        })
    }

    /// Waits until all queued cache fills have been applied.
    pub async fn flush_cache_writes(&self) {
        self.cache_writes.flush().await;
    }

    /// Returns counters for the cache write queue.
    #[must_use]
    pub fn cache_write_stats(&self) -> QueueStats {
        self.cache_writes.stats()
    }

    /// Drains pending cache fills and stops the worker.
    pub async fn shutdown(&self) {
        self.cache_writes.shutdown().await;
    }
}

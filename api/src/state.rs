//! Application state module.
//!
//! Defines the shared application state that is passed to route handlers.

use crate::auth::{AccessPolicy, AuthLayerState, Permission};
use crate::config::{Config, QueryBackend};
use crate::db::{Database, DatabaseConfig};
use crate::metrics::Metrics;
use anyhow::{Context, Result};
use shared::admission::{AdmissionConfig, AdmissionController};
use shared::cache::ResultCache;
use shared::executor::{ClickHouseExecutor, QueryExecutor, StaticExecutor};
use shared::models::LogRecord;
use shared::pipeline::{PipelineConfig, QueryPipeline};
use shared::query::QueryParser;
use shared::storage::{ClickHouseLogSink, InMemoryLogSink, LogSink};
use shared::store::{InMemoryStore, RedisConfig, RedisStore, SharedStore};
use shared::tasks::BackgroundQueue;
use std::sync::Arc;

/// Name of the ingestion queue.
pub const INGEST_QUEUE: &str = "log_ingest";

/// Default ingestion queue capacity, in batches.
pub const DEFAULT_INGEST_QUEUE_CAPACITY: usize = 1024;

/// Application state shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    pipeline: Arc<QueryPipeline>,
    policy: Arc<AccessPolicy>,
    ingest: Arc<BackgroundQueue<Vec<LogRecord>>>,
    metrics: Metrics,
}

impl AppState {
    /// Creates the state and starts the ingestion worker.
    ///
    /// Batches accepted by the ingest route are written to `sink` in the
    /// background; records in a failed write count as ingestion errors.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn new(
        pipeline: QueryPipeline,
        policy: AccessPolicy,
        sink: Arc<dyn LogSink>,
        metrics: Metrics,
        ingest_capacity: usize,
    ) -> Self {
        let worker_metrics = metrics.clone();
        let ingest = BackgroundQueue::spawn(
            INGEST_QUEUE,
            ingest_capacity,
            move |batch: Vec<LogRecord>| {
                let sink = Arc::clone(&sink);
                let metrics = worker_metrics.clone();
                async move {
                    let count = batch.len();
                    let result = sink.write_batch(batch).await;
                    if result.is_err() {
                        metrics.record_ingestion_errors(count);
                    }
                    result
                }
            },
        );

        Self {
            pipeline: Arc::new(pipeline),
            policy: Arc::new(policy),
            ingest: Arc::new(ingest),
            metrics,
        }
    }

    /// Creates a state backed by an in-process store.
    ///
    /// This is useful for development and testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the metrics registry cannot be built.
    pub fn with_in_memory_store(
        policy: AccessPolicy,
        executor: Arc<dyn QueryExecutor>,
        sink: Arc<dyn LogSink>,
    ) -> Result<Self> {
        Self::with_limits(
            policy,
            executor,
            sink,
            AdmissionConfig::default(),
            PipelineConfig::default(),
        )
    }

    /// Like [`AppState::with_in_memory_store`] with explicit limits.
    ///
    /// # Errors
    ///
    /// Returns an error if the metrics registry cannot be built.
    pub fn with_limits(
        policy: AccessPolicy,
        executor: Arc<dyn QueryExecutor>,
        sink: Arc<dyn LogSink>,
        admission: AdmissionConfig,
        pipeline: PipelineConfig,
    ) -> Result<Self> {
        let store: Arc<dyn SharedStore> = InMemoryStore::new_shared();
        let pipeline = QueryPipeline::new(
            QueryParser::default(),
            AdmissionController::new(Arc::clone(&store), admission),
            ResultCache::new(store),
            executor,
            pipeline,
        );
        Ok(Self::new(
            pipeline,
            policy,
            sink,
            Metrics::new().context("Failed to register metrics")?,
            DEFAULT_INGEST_QUEUE_CAPACITY,
        ))
    }

    /// Builds the production state from configuration.
    ///
    /// Connects to Redis when `LOGSIFT_REDIS_URL` is set; otherwise limits and
    /// cache entries are local to this process.
    ///
    /// # Errors
    ///
    /// Returns an error if Redis is configured but unreachable, or the access
    /// policy cannot be loaded.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let store: Arc<dyn SharedStore> = if let Some(url) = &config.redis_url {
            let redis = RedisStore::connect(&RedisConfig {
                url: url.clone(),
                command_timeout: config.redis_timeout,
            })
            .await
            .context("Failed to connect to Redis")?;
            tracing::info!("Using Redis for admission state and result cache");
            Arc::new(redis)
        } else {
            tracing::warn!(
                "LOGSIFT_REDIS_URL not set; limits and cache are local to this instance"
            );
            InMemoryStore::new_shared()
        };

        let (executor, sink): (Arc<dyn QueryExecutor>, Arc<dyn LogSink>) = match config.backend {
            QueryBackend::ClickHouse => {
                let db = Database::new(&DatabaseConfig::from_env());
                if let Err(e) = db.ensure_log_table(&config.table).await {
                    tracing::warn!(error = %e, "ClickHouse not ready at startup");
                }
                (
                    ClickHouseExecutor::new_shared(db.client()),
                    ClickHouseLogSink::new_shared(db.client(), &config.table),
                )
            }
            QueryBackend::Static => {
                tracing::warn!("Using static query backend; results are always empty");
                (
                    Arc::new(StaticExecutor::default()),
                    InMemoryLogSink::new_shared(),
                )
            }
        };

        let policy = match &config.policy_file {
            Some(path) => {
                let policy = AccessPolicy::from_file(path)?;
                tracing::info!(
                    path = %path.display(),
                    tokens = policy.token_count(),
                    "Loaded access policy"
                );
                policy
            }
            None => {
                tracing::warn!("LOGSIFT_POLICY_FILE not set; every request will be rejected");
                AccessPolicy::default()
            }
        };

        let pipeline = QueryPipeline::new(
            QueryParser::new(config.vocabulary()),
            AdmissionController::new(Arc::clone(&store), config.admission()),
            ResultCache::with_ttl(store, config.cache_ttl),
            executor,
            config.pipeline(),
        );

        Ok(Self::new(
            pipeline,
            policy,
            sink,
            Metrics::new().context("Failed to register metrics")?,
            config.ingest_queue_capacity,
        ))
    }

    /// Returns the query pipeline.
    #[must_use]
    pub fn pipeline(&self) -> &QueryPipeline {
        &self.pipeline
    }

    /// Returns the ingestion queue.
    #[must_use]
    pub fn ingest(&self) -> &BackgroundQueue<Vec<LogRecord>> {
        &self.ingest
    }

    /// Returns the metrics registry.
    #[must_use]
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Returns middleware state requiring `permission`.
    #[must_use]
    pub fn auth(&self, permission: Permission) -> AuthLayerState {
        AuthLayerState::new(
            Arc::clone(&self.policy),
            self.pipeline.admission().clone(),
            permission,
        )
    }

    /// Drains background work: pending ingestion batches and cache writes.
    pub async fn shutdown(&self) {
        self.ingest.shutdown().await;
        self.pipeline.shutdown().await;
        tracing::info!(
            ingest = ?self.ingest.stats(),
            cache_writes = ?self.pipeline.cache_write_stats(),
            "Background queues drained"
        );
    }
}

//! Prometheus metrics for the API server.
//!
//! Metrics live in a registry owned by the application state rather than the
//! process-wide default registry, so every test builds an isolated set.

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::time::Duration;

/// Counters and histograms exported at `/metrics`.
#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    logs_ingested: IntCounter,
    ingestion_errors: IntCounter,
    query_duration: Histogram,
    queries: IntCounterVec,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}

impl Metrics {
    /// Creates and registers all metrics.
    ///
    /// # Errors
    ///
    /// Returns an error if a metric cannot be registered.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let logs_ingested = IntCounter::new(
            "logsift_logs_ingested_total",
            "Total number of log records accepted for ingestion",
        )?;
        let ingestion_errors = IntCounter::new(
            "logsift_ingestion_errors_total",
            "Total number of log records that failed ingestion",
        )?;
        let query_duration = Histogram::with_opts(
            HistogramOpts::new(
                "logsift_query_duration_seconds",
                "Time spent processing search queries",
            )
            .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0]),
        )?;
        let queries = IntCounterVec::new(
            Opts::new("logsift_queries_total", "Search queries by outcome"),
            &["outcome"],
        )?;

        registry.register(Box::new(logs_ingested.clone()))?;
        registry.register(Box::new(ingestion_errors.clone()))?;
        registry.register(Box::new(query_duration.clone()))?;
        registry.register(Box::new(queries.clone()))?;

        Ok(Self {
            registry,
            logs_ingested,
            ingestion_errors,
            query_duration,
            queries,
        })
    }

    /// Counts log records accepted for ingestion.
    pub fn record_ingested(&self, count: usize) {
        self.logs_ingested
            .inc_by(u64::try_from(count).unwrap_or(u64::MAX));
    }

    /// Counts log records that failed ingestion.
    pub fn record_ingestion_errors(&self, count: usize) {
        self.ingestion_errors
            .inc_by(u64::try_from(count).unwrap_or(u64::MAX));
    }

    /// Records a finished query and its outcome label.
    pub fn record_query(&self, outcome: &str, elapsed: Duration) {
        self.query_duration.observe(elapsed.as_secs_f64());
        self.queries.with_label_values(&[outcome]).inc();
    }

    /// Renders all metrics in the Prometheus text format.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

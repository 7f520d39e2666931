//! Logsift Shared Library
//!
//! This crate contains the query path of the Logsift log-analytics service:
//! the search language compiler, admission control, result caching and the
//! pipeline that sequences them, plus the ingestion model and sinks.
//!
//! # Modules
//!
//! - [`query`] - Search language parsing, guardrails, SQL compilation
//! - [`store`] - Shared counter/cache store (Redis and in-memory)
//! - [`admission`] - Per-tenant rate and concurrency gates
//! - [`cache`] - Fingerprint-keyed result cache
//! - [`tasks`] - Bounded background work queue
//! - [`executor`] - Query execution against the row store
//! - [`pipeline`] - End-to-end query orchestration
//! - [`models`] - Log record model
//! - [`storage`] - Log sinks for ingestion
//!
//! # Example
//!
//! ```
//! use shared::admission::{AdmissionConfig, AdmissionController};
//! use shared::cache::ResultCache;
//! use shared::executor::StaticExecutor;
//! use shared::pipeline::{CacheStatus, PipelineConfig, QueryPipeline, QueryRequest};
//! use shared::query::QueryParser;
//! use shared::store::InMemoryStore;
//! use std::sync::Arc;
//!
//! # tokio_test::block_on(async {
//! let store = InMemoryStore::new_shared();
//! let pipeline = QueryPipeline::new(
//!     QueryParser::default(),
//!     AdmissionController::new(store.clone(), AdmissionConfig::default()),
//!     ResultCache::new(store),
//!     Arc::new(StaticExecutor::new("[]")),
//!     PipelineConfig::default(),
//! );
//!
//! let request = QueryRequest::new("tenant-a", "search level=ERROR | head 10");
//! let outcome = pipeline.execute(&request).await.unwrap();
//! assert_eq!(outcome.cache, CacheStatus::Miss);
//! # });
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod admission;
pub mod cache;
pub mod executor;
pub mod models;
pub mod pipeline;
pub mod query;
pub mod storage;
pub mod store;
pub mod tasks;

/// Re-export common dependencies for convenience.
pub use chrono;
pub use serde;
pub use serde_json;
pub use validator;

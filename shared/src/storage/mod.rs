//! Storage traits and implementations.
//!
//! The `LogSink` trait defines where ingested log records are written,
//! allowing different implementations (in-memory, database-backed).

pub mod log_sink;

pub use log_sink::{ClickHouseLogSink, InMemoryLogSink, LogSink, LogSinkError};

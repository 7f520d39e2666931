//! Data models for Logsift.

pub mod log;

pub use log::{LogBatch, LogRecord, LogValidationError};

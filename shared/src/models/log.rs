//! Log record model.
//!
//! Defines the `LogRecord` accepted by the ingestion endpoint and written to
//! the log sink.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;
use validator::Validate;

/// A single structured log event.
///
/// `org_id` is never read from client input; the server stamps it from the
/// authenticated tenant with [`LogRecord::stamp`].
///
/// # Example
///
/// ```
/// use shared::models::LogRecord;
///
/// let record = LogRecord::new("ERROR", "auth", "token expired")
///     .with_attribute("user", "alice")
///     .stamp("tenant-a");
///
/// assert_eq!(record.org_id, "tenant-a");
/// assert!(record.validate_record().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct LogRecord {
    /// When the event occurred. Defaults to the time of ingestion.
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,

    /// Severity, as reported by the client (e.g. `ERROR`).
    #[validate(length(min = 1, message = "level cannot be empty"))]
    pub level: String,

    /// Name of the emitting service.
    #[validate(length(min = 1, message = "service cannot be empty"))]
    pub service: String,

    /// The log message.
    #[validate(length(min = 1, message = "message cannot be empty"))]
    pub message: String,

    /// Additional key-value attributes.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub attributes: HashMap<String, serde_json::Value>,

    /// Owning tenant, stamped by the server.
    #[serde(default, skip_deserializing)]
    pub org_id: String,
}

/// Errors that can occur during log record validation.
#[derive(Debug, Error)]
pub enum LogValidationError {
    /// A required field is empty.
    #[error("Field '{0}' cannot be empty")]
    EmptyField(&'static str),

    /// The timestamp cannot be stored as epoch nanoseconds.
    #[error("Timestamp must lie between 1677-09-21 and 2262-04-11")]
    TimestampOutOfRange,

    /// Validation failed with details.
    #[error("Validation failed: {0}")]
    ValidationError(#[from] validator::ValidationErrors),
}

impl LogRecord {
    /// Creates a record timestamped now.
    #[must_use]
    pub fn new(
        level: impl Into<String>,
        service: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            level: level.into(),
            service: service.into(),
            message: message.into(),
            attributes: HashMap::new(),
            org_id: String::new(),
        }
    }

    /// Adds an attribute.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        self.attributes.insert(
            key.into(),
            serde_json::to_value(value).unwrap_or(serde_json::Value::Null),
        );
        self
    }

    /// Sets the owning tenant, replacing any previous value.
    #[must_use]
    pub fn stamp(mut self, tenant_id: impl Into<String>) -> Self {
        self.org_id = tenant_id.into();
        self
    }

    /// Validates the record.
    ///
    /// # Errors
    ///
    /// Returns an error if `level`, `service` or `message` is empty, or the
    /// timestamp is outside the nanosecond range.
    pub fn validate_record(&self) -> Result<(), LogValidationError> {
        for (name, value) in [
            ("level", &self.level),
            ("service", &self.service),
            ("message", &self.message),
        ] {
            if value.trim().is_empty() {
                return Err(LogValidationError::EmptyField(name));
            }
        }
        if self.timestamp.timestamp_nanos_opt().is_none() {
            return Err(LogValidationError::TimestampOutOfRange);
        }
        self.validate()?;
        Ok(())
    }
}

/// Request body for ingestion: one record or a batch.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum LogBatch {
    /// A batch of records.
    Many(Vec<LogRecord>),
    /// A single record.
    One(LogRecord),
}

impl LogBatch {
    /// Returns the records in submission order.
    #[must_use]
    pub fn into_records(self) -> Vec<LogRecord> {
        match self {
            Self::Many(records) => records,
            Self::One(record) => vec![record],
        }
    }
}

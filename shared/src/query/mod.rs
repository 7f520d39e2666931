//! Search language for Logsift.
//!
//! This module parses the pipe-based search language into an AST, enforces
//! query guardrails, and compiles the AST into tenant-isolated parameterized
//! SQL plus a cache fingerprint.
//!
//! # Supported Syntax
//!
//! ```text
//! search level=ERROR service=auth
//! search connection refused earliest=-24h latest=now
//! search level=ERROR | stats count by user | sort -count | head 50
//! search service=api | stats avg(latency) by host
//! ```
//!
//! # Example
//!
//! ```
//! use shared::query::{fingerprint, parse_query, to_sql};
//!
//! let query = parse_query("search level=ERROR | stats count by user | head 10").unwrap();
//! let compiled = to_sql(&query, "logs", "tenant-a");
//! assert!(compiled.sql.starts_with("SELECT user, count(*)"));
//! assert_eq!(fingerprint(&query, "tenant-a").len(), 16);
//! ```

mod ast;
mod compiler;
mod fields;
mod parser;

pub use ast::*;
pub use compiler::{fingerprint, to_sql, CompiledQuery, SqlArg, FINGERPRINT_BUCKET_SECS};
pub use fields::{is_identifier, FieldVocabulary, LOG_COLUMNS, TENANT_COLUMN, TIMESTAMP_COLUMN};
pub use parser::{parse_query, GuardrailViolation, ParseError, QueryParser};

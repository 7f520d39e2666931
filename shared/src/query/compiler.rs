//! SQL generation and cache fingerprinting for parsed queries.

use super::ast::{AggregateFunction, FilterOp, Query};
use super::fields::{LOG_COLUMNS, TENANT_COLUMN, TIMESTAMP_COLUMN};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::Write as _;
use xxhash_rust::xxh3::xxh3_64;

/// Granularity, in seconds, that relative time windows are rounded to when
/// fingerprinting. Matches the result cache TTL.
pub const FINGERPRINT_BUCKET_SECS: i64 = 30;

/// A positional SQL argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum SqlArg {
    /// A string value.
    Text(String),
    /// A point in time.
    Timestamp(DateTime<Utc>),
}

impl From<&str> for SqlArg {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for SqlArg {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<DateTime<Utc>> for SqlArg {
    fn from(ts: DateTime<Utc>) -> Self {
        Self::Timestamp(ts)
    }
}

impl std::fmt::Display for SqlArg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text(s) => write!(f, "'{s}'"),
            Self::Timestamp(ts) => write!(f, "{}", ts.to_rfc3339()),
        }
    }
}

/// A parameterized SQL statement ready for execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompiledQuery {
    /// SQL text with `?` placeholders.
    pub sql: String,
    /// Placeholder values, in order.
    pub args: Vec<SqlArg>,
}

/// Compiles `query` into SQL against `table`, restricted to `tenant_id`.
///
/// The tenant predicate is always the first clause and is bound as a
/// parameter. `table` and every field name are interpolated as identifiers;
/// the parser only admits vocabulary fields, and callers must pass a
/// validated table name.
///
/// # Examples
///
/// ```
/// use shared::query::{parse_query, to_sql, SqlArg};
///
/// let query = parse_query("search level=ERROR").unwrap();
/// let compiled = to_sql(&query, "logs", "tenant-a");
/// assert!(compiled.sql.contains("org_id = ?"));
/// assert_eq!(compiled.args[0], SqlArg::from("tenant-a"));
/// ```
#[must_use]
pub fn to_sql(query: &Query, table: &str, tenant_id: &str) -> CompiledQuery {
    let mut clauses = vec![
        format!("{TENANT_COLUMN} = ?"),
        format!("{TIMESTAMP_COLUMN} >= ? AND {TIMESTAMP_COLUMN} <= ?"),
    ];
    let mut args = vec![
        SqlArg::from(tenant_id),
        SqlArg::Timestamp(query.time_range.start),
        SqlArg::Timestamp(query.time_range.end),
    ];

    for filter in &query.filters {
        match filter.op {
            FilterOp::Eq => {
                clauses.push(format!("{} = ?", filter.field));
                args.push(SqlArg::from(filter.value.as_str()));
            }
            FilterOp::Like => {
                clauses.push("message LIKE ?".to_string());
                args.push(SqlArg::Text(format!("%{}%", escape_like(&filter.value))));
            }
        }
    }

    let where_sql = clauses.join(" AND ");
    let mut sql = String::new();

    if let Some(ref agg) = query.aggregation {
        let func_sql = match agg.function {
            AggregateFunction::Count => "count(*)".to_string(),
            other => format!("{other}({})", agg.field),
        };
        let alias = agg.function.name();

        sql.push_str("SELECT ");
        if let Some(ref group) = agg.group_by {
            let _ = write!(sql, "{group}, ");
        }
        let _ = write!(sql, "{func_sql} AS {alias} FROM {table} WHERE {where_sql}");
        if let Some(ref group) = agg.group_by {
            let _ = write!(sql, " GROUP BY {group}");
        }
        if let Some(ref sort) = query.sort {
            let _ = write!(sql, " ORDER BY {} {}", sort.field, direction(sort.descending));
        }
    } else {
        let _ = write!(
            sql,
            "SELECT {} FROM {table} WHERE {where_sql}",
            LOG_COLUMNS.join(", ")
        );
        match query.sort {
            Some(ref sort) => {
                let _ = write!(sql, " ORDER BY {} {}", sort.field, direction(sort.descending));
            }
            None => {
                let _ = write!(sql, " ORDER BY {TIMESTAMP_COLUMN} DESC");
            }
        }
    }

    let _ = write!(sql, " LIMIT {}", query.limit);

    CompiledQuery { sql, args }
}

/// Escapes `LIKE` metacharacters so free text matches literally.
fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn direction(descending: bool) -> &'static str {
    if descending {
        "DESC"
    } else {
        "ASC"
    }
}

/// Computes the cache fingerprint of `query` for `tenant_id`.
///
/// Relative windows are rendered as their width plus the end instant floored
/// to [`FINGERPRINT_BUCKET_SECS`], so repeated "last hour" queries land on the
/// same key within a bucket. Absolute windows are rendered exactly.
#[must_use]
pub fn fingerprint(query: &Query, tenant_id: &str) -> String {
    let mut canonical = String::with_capacity(128);
    push_part(&mut canonical, 'o', tenant_id);

    for filter in &query.filters {
        push_part(&mut canonical, 'f', &filter.field);
        push_part(&mut canonical, 'p', &filter.op.to_string());
        push_part(&mut canonical, 'v', &filter.value);
    }
    if let Some(ref agg) = query.aggregation {
        push_part(&mut canonical, 'a', agg.function.name());
        push_part(&mut canonical, 'x', &agg.field);
        push_part(&mut canonical, 'g', agg.group_by.as_deref().unwrap_or(""));
    }

    let range = query.time_range;
    if range.relative {
        let end = range.end.timestamp();
        let bucket = end - end.rem_euclid(FINGERPRINT_BUCKET_SECS);
        let _ = write!(canonical, "t:{}s@{bucket};", range.width().num_seconds());
    } else {
        let _ = write!(
            canonical,
            "t:{}..{};",
            range.start.timestamp_nanos_opt().unwrap_or_default(),
            range.end.timestamp_nanos_opt().unwrap_or_default()
        );
    }

    let _ = write!(canonical, "l:{};", query.limit);
    if let Some(ref sort) = query.sort {
        push_part(&mut canonical, 's', &sort.to_string());
    }

    format!("{:016x}", xxh3_64(canonical.as_bytes()))
}

/// Appends `value` with a length prefix so no two component lists render
/// to the same canonical string.
fn push_part(canonical: &mut String, tag: char, value: &str) {
    let _ = write!(canonical, "{tag}{}:{value}", value.len());
}

//! Abstract Syntax Tree definitions for the search language.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Maximum number of rows a query may return. Larger `head` values are clamped.
pub const MAX_LIMIT: usize = 10_000;

/// Maximum width of a query's time window, in hours (30 days).
pub const MAX_HOURS_RANGE: i64 = 720;

/// End-to-end deadline applied to a query request.
pub const DEFAULT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

/// Row limit used when the query has no `head` stage.
pub const DEFAULT_LIMIT: usize = 100;

/// Width of the time window used when the query sets no bounds, in hours.
pub const DEFAULT_WINDOW_HOURS: i64 = 1;

/// Pseudo-field used by free-text filters.
pub const RAW_FIELD: &str = "_raw";

/// Filter operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOp {
    /// Exact equality (`field=value`).
    #[serde(rename = "=")]
    Eq,
    /// Substring match against the raw message.
    #[serde(rename = "LIKE")]
    Like,
}

impl std::fmt::Display for FilterOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Eq => write!(f, "="),
            Self::Like => write!(f, "LIKE"),
        }
    }
}

/// A single search filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    /// The field name (`_raw` for free text).
    pub field: String,
    /// The operator.
    pub op: FilterOp,
    /// The value to match.
    pub value: String,
}

impl Filter {
    /// Creates an equality filter.
    #[must_use]
    pub fn eq(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            op: FilterOp::Eq,
            value: value.into(),
        }
    }

    /// Creates a free-text filter.
    #[must_use]
    pub fn free_text(value: impl Into<String>) -> Self {
        Self {
            field: RAW_FIELD.to_string(),
            op: FilterOp::Like,
            value: value.into(),
        }
    }

    /// Returns true if this is a free-text filter.
    #[must_use]
    pub fn is_free_text(&self) -> bool {
        self.op == FilterOp::Like
    }
}

impl std::fmt::Display for Filter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}{}", self.field, self.op, self.value)
    }
}

/// Aggregate functions accepted by the `stats` stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateFunction {
    /// Row count.
    Count,
    /// Arithmetic mean.
    Avg,
    /// Sum.
    Sum,
    /// Minimum.
    Min,
    /// Maximum.
    Max,
}

impl AggregateFunction {
    /// Looks up a function by its search-language name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "count" => Some(Self::Count),
            "avg" => Some(Self::Avg),
            "sum" => Some(Self::Sum),
            "min" => Some(Self::Min),
            "max" => Some(Self::Max),
            _ => None,
        }
    }

    /// The function name, also used as the result column alias.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Count => "count",
            Self::Avg => "avg",
            Self::Sum => "sum",
            Self::Min => "min",
            Self::Max => "max",
        }
    }
}

impl std::fmt::Display for AggregateFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Aggregation requested by a `stats` stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aggregation {
    /// The aggregate function.
    pub function: AggregateFunction,
    /// The aggregated field (`*` for a bare `count`).
    pub field: String,
    /// Optional group-by field.
    pub group_by: Option<String>,
}

impl std::fmt::Display for Aggregation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.function, self.field)?;
        if let Some(ref group) = self.group_by {
            write!(f, " by {group}")?;
        }
        Ok(())
    }
}

/// Time window a query is restricted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    /// Inclusive lower bound.
    pub start: DateTime<Utc>,
    /// Inclusive upper bound.
    pub end: DateTime<Utc>,
    /// True when a bound was derived from the parse instant (default window,
    /// `now`, or a relative offset) rather than given as an absolute timestamp.
    pub relative: bool,
}

impl TimeRange {
    /// The default window: the hour ending at `now`.
    #[must_use]
    pub fn last_hour(now: DateTime<Utc>) -> Self {
        Self {
            start: now - Duration::hours(DEFAULT_WINDOW_HOURS),
            end: now,
            relative: true,
        }
    }

    /// Width of the window.
    #[must_use]
    pub fn width(&self) -> Duration {
        self.end - self.start
    }
}

/// Sort order requested by a `sort` stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// The field to sort by.
    pub field: String,
    /// True for descending order (`-field`).
    pub descending: bool,
}

impl std::fmt::Display for Order {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefix = if self.descending { '-' } else { '+' };
        write!(f, "{prefix}{}", self.field)
    }
}

/// A parsed search-language query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    /// Filters in source order.
    pub filters: Vec<Filter>,
    /// Optional aggregation.
    pub aggregation: Option<Aggregation>,
    /// Time window.
    pub time_range: TimeRange,
    /// Maximum number of rows returned.
    pub limit: usize,
    /// Optional sort order.
    pub sort: Option<Order>,
}

impl Query {
    /// Creates an empty query over the default window ending at `now`.
    #[must_use]
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            filters: Vec::new(),
            aggregation: None,
            time_range: TimeRange::last_hour(now),
            limit: DEFAULT_LIMIT,
            sort: None,
        }
    }

    /// Adds a filter.
    #[must_use]
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Sets the aggregation.
    #[must_use]
    pub fn with_aggregation(mut self, aggregation: Aggregation) -> Self {
        self.aggregation = Some(aggregation);
        self
    }

    /// Sets the sort order.
    #[must_use]
    pub fn with_sort(mut self, field: impl Into<String>, descending: bool) -> Self {
        self.sort = Some(Order {
            field: field.into(),
            descending,
        });
        self
    }

    /// Sets the limit.
    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = limit;
        self
    }
}

impl std::fmt::Display for Query {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "search")?;
        for filter in &self.filters {
            if filter.is_free_text() {
                write!(f, " {}", filter.value)?;
            } else {
                write!(f, " {}={}", filter.field, filter.value)?;
            }
        }
        if let Some(ref agg) = self.aggregation {
            write!(f, " | stats {agg}")?;
        }
        if let Some(ref sort) = self.sort {
            write!(f, " | sort {sort}")?;
        }
        write!(f, " | head {}", self.limit)
    }
}

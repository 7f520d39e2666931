//! Search-language parser.
//!
//! Parses pipelines like:
//! - `search level=ERROR service=auth`
//! - `search timeout earliest=-24h | head 20`
//! - `search level=ERROR | stats count by user | sort -count | head 50`
//!
//! Stages are split on `|` and tokens on whitespace; there is no quoting.
//! Token-level syntax (aggregate calls, time modifiers, `head` counts) is
//! handled with nom.

use super::ast::{
    AggregateFunction, Aggregation, Filter, Order, Query, TimeRange, DEFAULT_WINDOW_HOURS,
    MAX_HOURS_RANGE, MAX_LIMIT,
};
use super::fields::{FieldVocabulary, TENANT_COLUMN, TIMESTAMP_COLUMN};
use chrono::{DateTime, Duration, Utc};
use nom::{
    branch::alt,
    bytes::complete::{tag, take_while1},
    character::complete::{char, digit1, one_of},
    combinator::{all_consuming, map, map_res, opt, recognize, value},
    sequence::{delimited, pair},
    IResult, Parser,
};
use thiserror::Error;

/// Errors that can occur during query parsing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// A stage is malformed.
    #[error("Invalid query syntax: {0}")]
    Syntax(String),

    /// A pipe stage names an unknown command.
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    /// An `earliest=` / `latest=` value could not be understood.
    #[error("Invalid time modifier {key}={value}: expected 'now', '-<N>[s|m|h|d|w]' or an RFC 3339 timestamp")]
    InvalidTimeModifier {
        /// The modifier key.
        key: String,
        /// The offending value.
        value: String,
    },

    /// The query parsed but violates a guardrail.
    #[error(transparent)]
    Guardrail(#[from] GuardrailViolation),
}

/// Guardrails enforced after a query has been parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GuardrailViolation {
    /// The time window is wider than [`MAX_HOURS_RANGE`].
    #[error("Time range exceeds maximum allowed ({max_hours} hours)")]
    TimeRangeTooWide {
        /// The maximum window, in hours.
        max_hours: i64,
    },

    /// The time window ends before it starts.
    #[error("Time range ends before it starts")]
    InvertedTimeRange,

    /// A time bound cannot be stored as nanoseconds since the epoch.
    #[error("Time range must lie between 1677-09-21 and 2262-04-11")]
    TimeOutOfRange,

    /// The query references the tenant column.
    #[error("Field '{0}' is reserved and cannot be queried")]
    ReservedField(String),

    /// The query references a field outside the vocabulary.
    #[error("Unknown field '{0}'")]
    UnknownField(String),

    /// A `sort` after `stats` names a column the aggregation does not produce.
    #[error("Cannot sort aggregated results by '{0}'")]
    UnsortableField(String),

    /// The `stats` stage names an unsupported function.
    #[error("Unsupported aggregate function '{0}'")]
    UnsupportedFunction(String),
}

/// Parses search-language text into a [`Query`] using the default vocabulary.
///
/// # Errors
///
/// Returns a `ParseError` if a stage is malformed or a guardrail is violated.
///
/// # Examples
///
/// ```
/// use shared::query::{parse_query, FilterOp};
///
/// let query = parse_query("search level=ERROR | head 10").unwrap();
/// assert_eq!(query.filters[0].op, FilterOp::Eq);
/// assert_eq!(query.limit, 10);
/// ```
pub fn parse_query(input: &str) -> Result<Query, ParseError> {
    QueryParser::default().parse(input)
}

/// Search-language parser bound to a field vocabulary.
#[derive(Debug, Clone, Default)]
pub struct QueryParser {
    vocabulary: FieldVocabulary,
}

/// `earliest=` / `latest=` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimeModifier {
    Now,
    Ago(Duration),
    At(DateTime<Utc>),
}

impl TimeModifier {
    /// Returns `None` when the offset reaches past the calendar.
    fn resolve(self, now: DateTime<Utc>) -> Option<Bound> {
        let at = match self {
            Self::Now => now,
            Self::Ago(offset) => now.checked_sub_signed(offset)?,
            Self::At(instant) => instant,
        };
        Some(Bound {
            at,
            relative: !matches!(self, Self::At(_)),
        })
    }
}

/// A resolved `earliest=` / `latest=` value.
#[derive(Debug, Clone, Copy)]
struct Bound {
    at: DateTime<Utc>,
    relative: bool,
}

#[derive(Debug, Default)]
struct TimeBounds {
    earliest: Option<Bound>,
    latest: Option<Bound>,
}

impl TimeBounds {
    fn resolve(&self, now: DateTime<Utc>) -> TimeRange {
        match (self.earliest, self.latest) {
            (None, None) => TimeRange::last_hour(now),
            (earliest, latest) => {
                let latest = latest.unwrap_or(Bound {
                    at: now,
                    relative: true,
                });
                let start = earliest.map_or_else(
                    || {
                        latest
                            .at
                            .checked_sub_signed(Duration::hours(DEFAULT_WINDOW_HOURS))
                            .unwrap_or(latest.at)
                    },
                    |e| e.at,
                );
                TimeRange {
                    start,
                    end: latest.at,
                    relative: latest.relative || earliest.is_some_and(|e| e.relative),
                }
            }
        }
    }
}

impl QueryParser {
    /// Creates a parser that accepts the given field names.
    #[must_use]
    pub fn new(vocabulary: FieldVocabulary) -> Self {
        Self { vocabulary }
    }

    /// Returns the vocabulary this parser validates against.
    #[must_use]
    pub fn vocabulary(&self) -> &FieldVocabulary {
        &self.vocabulary
    }

    /// Parses `input`, anchoring relative time bounds at the current instant.
    ///
    /// # Errors
    ///
    /// Returns a `ParseError` if a stage is malformed or a guardrail is violated.
    pub fn parse(&self, input: &str) -> Result<Query, ParseError> {
        self.parse_at(input, Utc::now())
    }

    /// Parses `input`, anchoring relative time bounds at `now`.
    ///
    /// # Errors
    ///
    /// Returns a `ParseError` if a stage is malformed or a guardrail is violated.
    pub fn parse_at(&self, input: &str, now: DateTime<Utc>) -> Result<Query, ParseError> {
        let mut query = Query::new(now);
        let mut bounds = TimeBounds::default();

        for (index, stage) in input.split('|').enumerate() {
            let stage = stage.trim();
            if index == 0 {
                parse_search(stage, now, &mut query, &mut bounds)?;
                continue;
            }

            let tokens: Vec<&str> = stage.split_whitespace().collect();
            let Some(&command) = tokens.first() else {
                return Err(ParseError::Syntax("empty pipeline stage".to_string()));
            };
            match command {
                "stats" => parse_stats(&tokens, &mut query)?,
                "sort" => parse_sort(&tokens, &mut query)?,
                "head" => parse_head(&tokens, &mut query)?,
                other => return Err(ParseError::UnknownCommand(other.to_string())),
            }
        }

        query.time_range = bounds.resolve(now);
        self.apply_guardrails(&mut query)?;
        Ok(query)
    }

    fn apply_guardrails(&self, query: &mut Query) -> Result<(), GuardrailViolation> {
        query.limit = query.limit.min(MAX_LIMIT);

        let range = query.time_range;
        // Executors and fingerprints carry bounds as epoch nanoseconds.
        if range.start.timestamp_nanos_opt().is_none() || range.end.timestamp_nanos_opt().is_none() {
            return Err(GuardrailViolation::TimeOutOfRange);
        }
        if range.end < range.start {
            return Err(GuardrailViolation::InvertedTimeRange);
        }
        if range.width() > Duration::hours(MAX_HOURS_RANGE) {
            return Err(GuardrailViolation::TimeRangeTooWide {
                max_hours: MAX_HOURS_RANGE,
            });
        }

        for filter in query.filters.iter().filter(|f| !f.is_free_text()) {
            self.check_field(&filter.field)?;
        }

        if let Some(ref agg) = query.aggregation {
            if agg.field != "*" {
                self.check_field(&agg.field)?;
            }
            if let Some(ref group) = agg.group_by {
                self.check_field(group)?;
            }
        }

        if let Some(ref sort) = query.sort {
            match query.aggregation {
                // Aggregated rows only carry the group column and the alias.
                Some(ref agg) => {
                    if sort.field != agg.function.name()
                        && agg.group_by.as_deref() != Some(sort.field.as_str())
                    {
                        return Err(GuardrailViolation::UnsortableField(sort.field.clone()));
                    }
                }
                None if sort.field == TIMESTAMP_COLUMN => {}
                None => self.check_field(&sort.field)?,
            }
        }

        Ok(())
    }

    fn check_field(&self, field: &str) -> Result<(), GuardrailViolation> {
        if field == TENANT_COLUMN {
            return Err(GuardrailViolation::ReservedField(field.to_string()));
        }
        if !self.vocabulary.contains(field) {
            return Err(GuardrailViolation::UnknownField(field.to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// Stage parsers
// ============================================================================

fn parse_search(
    stage: &str,
    now: DateTime<Utc>,
    query: &mut Query,
    bounds: &mut TimeBounds,
) -> Result<(), ParseError> {
    let body = if stage == "search" {
        ""
    } else {
        stage.strip_prefix("search ").unwrap_or(stage)
    };

    for token in body.split_whitespace() {
        let Some((key, val)) = token.split_once('=') else {
            query.filters.push(Filter::free_text(token));
            continue;
        };
        match key {
            "" => {
                return Err(ParseError::Syntax(format!(
                    "filter '{token}' has an empty field name"
                )))
            }
            "earliest" => bounds.earliest = Some(time_modifier(key, val, now)?),
            "latest" => bounds.latest = Some(time_modifier(key, val, now)?),
            _ => query.filters.push(Filter::eq(key, val)),
        }
    }
    Ok(())
}

fn parse_stats(tokens: &[&str], query: &mut Query) -> Result<(), ParseError> {
    if tokens.len() < 2 {
        return Err(ParseError::Syntax("invalid stats syntax".to_string()));
    }

    let call = tokens[1];
    let (name, field) = match all_consuming(aggregate_call).parse(call) {
        Ok((_, parsed)) => parsed,
        Err(_) => {
            return Err(ParseError::Syntax(format!(
                "invalid stats function '{call}'"
            )))
        }
    };
    let function = AggregateFunction::from_name(name)
        .ok_or_else(|| GuardrailViolation::UnsupportedFunction(name.to_string()))?;
    let field = field.unwrap_or("*");
    if field == "*" && function != AggregateFunction::Count {
        return Err(ParseError::Syntax(format!("{function} requires a field")));
    }

    let group_by = match &tokens[2..] {
        [] => None,
        ["by", group] => Some((*group).to_string()),
        ["by"] => {
            return Err(ParseError::Syntax(
                "stats 'by' must be followed by a field".to_string(),
            ))
        }
        rest => {
            return Err(ParseError::Syntax(format!(
                "unexpected tokens in stats stage: {}",
                rest.join(" ")
            )))
        }
    };

    query.aggregation = Some(Aggregation {
        function,
        field: field.to_string(),
        group_by,
    });
    Ok(())
}

fn parse_sort(tokens: &[&str], query: &mut Query) -> Result<(), ParseError> {
    if tokens.len() < 2 {
        return Err(ParseError::Syntax("invalid sort syntax".to_string()));
    }

    let token = tokens[1];
    let (field, descending) = if let Some(field) = token.strip_prefix('-') {
        (field, true)
    } else if let Some(field) = token.strip_prefix('+') {
        (field, false)
    } else {
        (token, false)
    };
    if field.is_empty() {
        return Err(ParseError::Syntax("sort requires a field".to_string()));
    }

    query.sort = Some(Order {
        field: field.to_string(),
        descending,
    });
    Ok(())
}

fn parse_head(tokens: &[&str], query: &mut Query) -> Result<(), ParseError> {
    if tokens.len() < 2 {
        return Err(ParseError::Syntax("invalid head syntax".to_string()));
    }

    // Leading digits only; anything unparsable yields 0 rather than an error.
    query.limit = match leading_integer(tokens[1]) {
        Ok((_, n)) => usize::try_from(n.max(0)).unwrap_or(usize::MAX),
        Err(_) => 0,
    };
    Ok(())
}

// ============================================================================
// Token parsers
// ============================================================================

fn identifier(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_alphanumeric() || c == '_')(input)
}

/// `count`, `count()`, `avg(latency)`.
fn aggregate_call(input: &str) -> IResult<&str, (&str, Option<&str>)> {
    let (input, name) = identifier(input)?;
    let (input, field) =
        opt(delimited(char('('), opt(alt((identifier, tag("*")))), char(')'))).parse(input)?;
    Ok((input, (name, field.flatten())))
}

/// Optional sign followed by digits, saturating on overflow.
fn leading_integer(input: &str) -> IResult<&str, i64> {
    map(
        recognize(pair(opt(one_of("+-")), digit1)),
        |s: &str| {
            s.parse::<i64>()
                .unwrap_or(if s.starts_with('-') { i64::MIN } else { i64::MAX })
        },
    )
    .parse(input)
}

/// `-<N><unit>` with unit one of `s`, `m`, `h`, `d`, `w`.
fn relative_offset(input: &str) -> IResult<&str, Duration> {
    map_res(
        (char('-'), digit1, one_of("smhdw")),
        |(_, amount, unit): (char, &str, char)| {
            let amount: i64 = amount.parse().map_err(|_| "offset out of range")?;
            let unit_secs = match unit {
                's' => 1,
                'm' => 60,
                'h' => 3_600,
                'd' => 86_400,
                _ => 604_800,
            };
            amount
                .checked_mul(unit_secs)
                .and_then(Duration::try_seconds)
                .ok_or("offset out of range")
        },
    )
    .parse(input)
}

fn time_modifier(key: &str, raw: &str, now: DateTime<Utc>) -> Result<Bound, ParseError> {
    let invalid = || ParseError::InvalidTimeModifier {
        key: key.to_string(),
        value: raw.to_string(),
    };
    let parsed = all_consuming(alt((
        value(TimeModifier::Now, tag("now")),
        map(relative_offset, TimeModifier::Ago),
    )))
    .parse(raw);

    let modifier = match parsed {
        Ok((_, modifier)) => modifier,
        Err(_) => DateTime::parse_from_rfc3339(raw)
            .map(|dt| TimeModifier::At(dt.with_timezone(&Utc)))
            .map_err(|_| invalid())?,
    };
    modifier.resolve(now).ok_or_else(invalid)
}

// ============================================================================
// Tests
// ============================================================================

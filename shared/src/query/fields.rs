//! Closed vocabulary of field names a query may reference.
//!
//! Field names end up interpolated into SQL as identifiers (`field = ?`,
//! `GROUP BY field`, `ORDER BY field`), so only names from this set are
//! accepted by the parser.

use std::collections::BTreeSet;

/// Column holding the tenant identifier. Never addressable from a query.
pub const TENANT_COLUMN: &str = "org_id";

/// Column holding the event time.
pub const TIMESTAMP_COLUMN: &str = "timestamp";

/// Columns returned by a plain (non-aggregated) search.
pub const LOG_COLUMNS: [&str; 4] = ["timestamp", "level", "service", "message"];

const DEFAULT_FIELDS: &[&str] = &[
    "level",
    "service",
    "message",
    "host",
    "user",
    "trace_id",
    "span_id",
    "status",
    "latency",
];

/// The set of field names queries may filter, group and sort on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldVocabulary {
    fields: BTreeSet<String>,
}

impl FieldVocabulary {
    /// Builds a vocabulary from the given names.
    ///
    /// Names that are not plain identifiers, and the tenant column, are skipped.
    #[must_use]
    pub fn new<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let fields = fields
            .into_iter()
            .map(|f| f.as_ref().trim().to_string())
            .filter(|f| is_identifier(f) && f != TENANT_COLUMN)
            .collect();
        Self { fields }
    }

    /// Parses a comma-separated list of field names.
    #[must_use]
    pub fn from_csv(list: &str) -> Self {
        Self::new(list.split(','))
    }

    /// Returns true if `field` may be referenced by a query.
    #[must_use]
    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains(field)
    }

    /// Iterates the field names in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(String::as_str)
    }
}

impl Default for FieldVocabulary {
    fn default() -> Self {
        Self::new(DEFAULT_FIELDS)
    }
}

/// Returns true if `name` is a plain SQL identifier (`[A-Za-z_][A-Za-z0-9_]*`).
#[must_use]
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_vocabulary() {
        let vocab = FieldVocabulary::default();
        assert!(vocab.contains("level"));
        assert!(vocab.contains("user"));
        assert!(!vocab.contains("org_id"));
        assert!(!vocab.contains("password"));
    }

    #[test]
    fn test_tenant_column_is_never_admitted() {
        let vocab = FieldVocabulary::from_csv("level, org_id ,service");
        assert!(vocab.contains("level"));
        assert!(vocab.contains("service"));
        assert!(!vocab.contains("org_id"));
    }

    #[test]
    fn test_non_identifiers_are_skipped() {
        let vocab = FieldVocabulary::new(["ok_field", "1bad", "drop table", "x;--", ""]);
        assert_eq!(vocab.iter().collect::<Vec<_>>(), vec!["ok_field"]);
    }

    #[test]
    fn test_is_identifier() {
        assert!(is_identifier("logs"));
        assert!(is_identifier("_raw"));
        assert!(is_identifier("trace_id2"));
        assert!(!is_identifier("logs; DROP"));
        assert!(!is_identifier("9lives"));
        assert!(!is_identifier(""));
    }
}

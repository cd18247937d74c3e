//! Peer-set resolution for "previous sequence" lookups.

use chrono::NaiveDate;
use rusqlite::types::Value;
use tracing::debug;

use crate::format::{SequenceFormat, SequenceReset};
use crate::record::SequencedRecord;
use crate::store::{SequenceStore, SEQUENCE_PREFIX_COLUMN};
use crate::SequenceResult;

/// Parameterized SQL predicate selecting the peers of a record.
///
/// Clauses are joined with `AND`; every value is bound, never interpolated.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ScopeFilter {
    clauses: Vec<String>,
    params: Vec<Value>,
}

impl ScopeFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_eq(mut self, column: &str, value: impl Into<Value>) -> Self {
        match value.into() {
            Value::Null => self.clauses.push(format!("{column} IS NULL")),
            value => {
                self.clauses.push(format!("{column} = ?"));
                self.params.push(value);
            }
        }
        self
    }

    pub fn with_not_empty(mut self, column: &str) -> Self {
        self.clauses
            .push(format!("({column} IS NOT NULL AND {column} != '')"));
        self
    }

    /// Inclusive date range.
    pub fn with_between(mut self, column: &str, start: NaiveDate, end: NaiveDate) -> Self {
        self.clauses.push(format!("{column} BETWEEN ? AND ?"));
        self.params.push(Value::Text(start.to_string()));
        self.params.push(Value::Text(end.to_string()));
        self
    }

    pub fn with_in<V: Into<Value>>(
        mut self,
        column: &str,
        values: impl IntoIterator<Item = V>,
        negate: bool,
    ) -> Self {
        let values: Vec<Value> = values.into_iter().map(Into::into).collect();
        if values.is_empty() {
            if !negate {
                self.clauses.push("0".to_string());
            }
            return self;
        }
        let placeholders = vec!["?"; values.len()].join(", ");
        let operator = if negate { "NOT IN" } else { "IN" };
        self.clauses
            .push(format!("{column} {operator} ({placeholders})"));
        self.params.extend(values);
        self
    }

    /// Rows whose `column` does not match the regular expression `pattern`.
    pub fn with_not_matching(mut self, column: &str, pattern: &str) -> Self {
        self.clauses.push(format!("{column} NOT REGEXP ?"));
        self.params.push(Value::Text(pattern.to_string()));
        self
    }

    /// Raw predicate with its bound values, for conditions the builders do not cover.
    pub fn with_clause(mut self, clause: impl Into<String>, params: Vec<Value>) -> Self {
        self.clauses.push(clause.into());
        self.params.extend(params);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn clauses(&self) -> &[String] {
        &self.clauses
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }

    pub fn to_sql(&self) -> String {
        if self.clauses.is_empty() {
            "1".to_string()
        } else {
            self.clauses.join(" AND ")
        }
    }
}

/// Build the peer filter of `record`.
///
/// The relaxed form only keeps the record's scope key and the caller hook. The
/// strict form narrows it to the period and numbering shape of the reference
/// sequence: the latest peer dated on or before the record, or the earliest
/// peer when none precedes it.
pub fn resolve_scope<S, R>(store: &S, record: &R, relaxed: bool) -> SequenceResult<ScopeFilter>
where
    S: SequenceStore + ?Sized,
    R: SequencedRecord + ?Sized,
{
    let table = record.table();
    let base = record
        .scope_key()
        .into_iter()
        .fold(ScopeFilter::new(), |scope, (column, value)| {
            scope.with_eq(column, value)
        })
        .with_not_empty(table.sequence_field);
    let mut scope = record.previous_sequence_scope(relaxed, base);
    if relaxed {
        return Ok(scope);
    }
    let Some(date) = record.sequence_date() else {
        return Ok(scope);
    };
    let Some(reference) = store.reference_sequence(table, &scope, record.id(), date)? else {
        return Ok(scope);
    };

    let reset = SequenceFormat::parse(&reference)
        .map(|format| format.reset())
        .unwrap_or(SequenceReset::Never);
    if let Some(window) = reset.window(date, record.fiscal_year_end()) {
        scope = scope.with_between(table.date_field, window.start, window.end);
    }
    if let Some(pattern) = reset.excluded_prefix_pattern() {
        scope = scope.with_not_matching(SEQUENCE_PREFIX_COLUMN, pattern);
    }
    debug!(
        table = table.table,
        reference = %reference,
        reset = %reset,
        "resolved strict sequence scope"
    );
    Ok(scope)
}

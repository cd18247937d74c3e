use chrono::NaiveDate;
use folio_core::{FiscalYearEnd, RecordId};
use rusqlite::types::Value;

use crate::format::SplitSequence;
use crate::scope::ScopeFilter;
use crate::store::{FieldWrite, SequenceTable};

/// Starting sequence of records that do not provide their own.
pub const DEFAULT_STARTING_SEQUENCE: &str = "00000000";

/// A record numbered by the allocator.
///
/// Required methods describe where the record lives and what it currently
/// holds; provided methods are hooks the allocator calls around a write.
pub trait SequencedRecord {
    fn table(&self) -> &'static SequenceTable;

    /// Primary key, `None` until the record is stored.
    fn id(&self) -> Option<RecordId>;

    fn sequence(&self) -> Option<&str>;

    fn assign_sequence(&mut self, value: Option<String>);

    /// Date driving the period placeholders.
    fn sequence_date(&self) -> Option<NaiveDate>;

    /// Column equalities isolating the record's numbering scope.
    fn scope_key(&self) -> Vec<(&'static str, Value)>;

    /// Fiscal year of the record's owner, when it has one.
    fn fiscal_year_end(&self) -> Option<FiscalYearEnd> {
        None
    }

    /// Refine the peer filter, e.g. to number refunds apart.
    fn previous_sequence_scope(&self, _relaxed: bool, scope: ScopeFilter) -> ScopeFilter {
        scope
    }

    /// Template used when the scope holds no sequence yet.
    fn starting_sequence(&self) -> String {
        DEFAULT_STARTING_SEQUENCE.to_string()
    }

    /// Column writes to flush before the sequence is written.
    fn take_pending_writes(&mut self) -> Vec<FieldWrite> {
        Vec::new()
    }

    /// Drop cached values derived from the sequence.
    fn invalidate_dependents(&mut self) {}

    fn set_split_sequence(&mut self, _split: SplitSequence) {}

    /// Recompute values derived from the sequence and return their writes.
    fn refresh_dependents(&mut self) -> Vec<FieldWrite> {
        Vec::new()
    }

    /// Human-readable scope, used in error messages and logs.
    fn describe_scope(&self) -> String {
        let parts: Vec<String> = self
            .scope_key()
            .iter()
            .map(|(column, value)| format!("{column}={}", display_value(value)))
            .collect();
        if parts.is_empty() {
            "global".to_string()
        } else {
            parts.join(", ")
        }
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Integer(value) => value.to_string(),
        Value::Real(value) => value.to_string(),
        Value::Text(value) => value.clone(),
        Value::Blob(bytes) => format!("<{} bytes>", bytes.len()),
    }
}

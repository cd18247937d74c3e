use chrono::NaiveDate;
use folio_core::RecordId;
use rusqlite::types::Value;

use crate::scope::ScopeFilter;
use crate::store::{SequenceTable, SEQUENCE_NUMBER_COLUMN, SEQUENCE_PREFIX_COLUMN};

/// Lookup of the greatest sequence within a scope.
///
/// Ordering is `(sequence_prefix DESC, sequence_number DESC)`: counters compare
/// numerically, so a counter that outgrew its padding still sorts last.
#[derive(Clone, Copy, Debug)]
pub struct Probe<'a> {
    pub scope: &'a ScopeFilter,
    pub exclude: Option<RecordId>,
    pub with_prefix: Option<&'a str>,
    /// Take the row lock on the matched row for the rest of the transaction.
    pub lock: bool,
}

impl<'a> Probe<'a> {
    pub fn new(scope: &'a ScopeFilter) -> Self {
        Self {
            scope,
            exclude: None,
            with_prefix: None,
            lock: false,
        }
    }

    pub fn excluding(mut self, id: Option<RecordId>) -> Self {
        self.exclude = id;
        self
    }

    pub fn with_prefix(mut self, prefix: Option<&'a str>) -> Self {
        self.with_prefix = prefix;
        self
    }

    pub fn locking(mut self, lock: bool) -> Self {
        self.lock = lock;
        self
    }

    /// SQL text and bound values of the lookup.
    ///
    /// The locking form is a no-op `UPDATE ... RETURNING`, which takes the
    /// database write lock before the value is read.
    pub fn statement(&self, table: &SequenceTable) -> (String, Vec<Value>) {
        let (filter, params) = filter_sql(self.scope, self.exclude, self.with_prefix);
        let order = format!(
            "ORDER BY {SEQUENCE_PREFIX_COLUMN} DESC, {SEQUENCE_NUMBER_COLUMN} DESC, {field} DESC",
            field = table.sequence_field,
        );
        let sql = if self.lock {
            format!(
                "UPDATE {t} SET {f} = {f} WHERE id = \
                 (SELECT id FROM {t} WHERE {filter} {order} LIMIT 1) RETURNING {f}",
                t = table.table,
                f = table.sequence_field,
            )
        } else {
            format!(
                "SELECT {f} FROM {t} WHERE {filter} {order} LIMIT 1",
                t = table.table,
                f = table.sequence_field,
            )
        };
        (sql, params)
    }
}

/// Lookup of the reference sequence of a record dated `date`.
///
/// With a date, the latest peer dated on or before it; without one, the
/// earliest dated peer.
pub fn reference_statement(
    table: &SequenceTable,
    scope: &ScopeFilter,
    exclude: Option<RecordId>,
    date: Option<NaiveDate>,
) -> (String, Vec<Value>) {
    let (mut filter, mut params) = filter_sql(scope, exclude, None);
    filter.push_str(&format!(" AND {} IS NOT NULL", table.date_field));
    let direction = match date {
        Some(date) => {
            filter.push_str(&format!(" AND {} <= ?", table.date_field));
            params.push(Value::Text(date.to_string()));
            "DESC"
        }
        None => "ASC",
    };
    let sql = format!(
        "SELECT {f} FROM {t} WHERE {filter} ORDER BY {d} {direction}, id {direction} LIMIT 1",
        f = table.sequence_field,
        t = table.table,
        d = table.date_field,
    );
    (sql, params)
}

fn filter_sql(
    scope: &ScopeFilter,
    exclude: Option<RecordId>,
    prefix: Option<&str>,
) -> (String, Vec<Value>) {
    let mut filter = scope.to_sql();
    let mut params = scope.params().to_vec();
    if let Some(id) = exclude {
        filter.push_str(" AND id != ?");
        params.push(Value::Integer(id.get()));
    }
    if let Some(prefix) = prefix {
        filter.push_str(&format!(" AND {SEQUENCE_PREFIX_COLUMN} = ?"));
        params.push(Value::Text(prefix.to_string()));
    }
    (filter, params)
}

use std::error::Error as StdError;

use chrono::NaiveDate;
use folio_core::RecordId;
use regex::Regex;
use rusqlite::functions::FunctionFlags;
use rusqlite::types::{Value, ValueRef};
use rusqlite::{ffi, params, params_from_iter, Connection, ErrorCode, OptionalExtension};

use crate::format::split_sequence;
use crate::probe::{reference_statement, Probe};
use crate::scope::ScopeFilter;
use crate::store::{
    FieldWrite, SequenceStore, SequenceTable, SEQUENCE_NUMBER_COLUMN, SEQUENCE_PREFIX_COLUMN,
};
use crate::{SequenceError, SequenceResult};

type BoxError = Box<dyn StdError + Send + Sync + 'static>;

/// Register the `REGEXP` operator used by strict scope filters.
pub fn register_sequence_functions(conn: &Connection) -> SequenceResult<()> {
    conn.create_scalar_function(
        "regexp",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let pattern = ctx.get_or_create_aux(0, |raw| -> Result<Regex, BoxError> {
                Ok(Regex::new(raw.as_str()?)?)
            })?;
            let matched = match ctx.get_raw(1) {
                ValueRef::Text(bytes) => std::str::from_utf8(bytes)
                    .map(|text| pattern.is_match(text))
                    .unwrap_or(false),
                _ => false,
            };
            Ok(matched)
        },
    )?;
    Ok(())
}

/// Whether `err` reports a UNIQUE or PRIMARY KEY constraint violation.
pub fn is_unique_violation(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(failure, _) => {
            failure.code == ErrorCode::ConstraintViolation
                && matches!(
                    failure.extended_code,
                    ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                )
        }
        _ => false,
    }
}

/// [`SequenceStore`] over a SQLite connection.
///
/// The store borrows the connection, so it works with a plain connection or a
/// `rusqlite::Transaction` (which derefs to one).
pub struct SqliteSequenceStore<'c> {
    conn: &'c Connection,
}

impl<'c> SqliteSequenceStore<'c> {
    pub fn new(conn: &'c Connection) -> SequenceResult<Self> {
        register_sequence_functions(conn)?;
        Ok(Self { conn })
    }

    pub fn connection(&self) -> &'c Connection {
        self.conn
    }

    fn query_sequence(&self, sql: &str, params: &[Value]) -> SequenceResult<Option<String>> {
        let mut stmt = self.conn.prepare(sql)?;
        let value = stmt
            .query_row(params_from_iter(params.iter()), |row| {
                row.get::<_, Option<String>>(0)
            })
            .optional()?;
        Ok(value.flatten())
    }
}

impl SequenceStore for SqliteSequenceStore<'_> {
    fn reference_sequence(
        &self,
        table: &SequenceTable,
        scope: &ScopeFilter,
        exclude: Option<RecordId>,
        date: NaiveDate,
    ) -> SequenceResult<Option<String>> {
        let (sql, params) = reference_statement(table, scope, exclude, Some(date));
        if let Some(found) = self.query_sequence(&sql, &params)? {
            return Ok(Some(found));
        }
        let (sql, params) = reference_statement(table, scope, exclude, None);
        self.query_sequence(&sql, &params)
    }

    fn last_sequence(
        &self,
        table: &SequenceTable,
        probe: &Probe<'_>,
    ) -> SequenceResult<Option<String>> {
        let (sql, params) = probe.statement(table);
        self.query_sequence(&sql, &params)
    }

    fn write_fields(
        &self,
        table: &SequenceTable,
        id: RecordId,
        fields: &[FieldWrite],
    ) -> SequenceResult<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let assignments = fields
            .iter()
            .map(|(column, _)| format!("{column} = ?"))
            .collect::<Vec<_>>()
            .join(", ");
        let id_value = Value::Integer(id.get());
        let values = fields
            .iter()
            .map(|(_, value)| value)
            .chain(std::iter::once(&id_value));
        let sql = format!("UPDATE {} SET {assignments} WHERE id = ?", table.table);
        let changed = match self.conn.execute(&sql, params_from_iter(values)) {
            Ok(changed) => changed,
            Err(err) if is_unique_violation(&err) => {
                return Err(SequenceError::Collision {
                    value: format!("{} record {id}", table.table),
                })
            }
            Err(err) => return Err(err.into()),
        };
        if changed == 0 {
            return Err(SequenceError::InvalidState(format!(
                "{} record {id} does not exist",
                table.table
            )));
        }
        Ok(())
    }

    fn write_sequence(
        &self,
        table: &SequenceTable,
        id: RecordId,
        value: Option<&str>,
    ) -> SequenceResult<()> {
        let split = value.map(split_sequence);
        let sql = format!(
            "UPDATE {t} SET {f} = ?1, {SEQUENCE_PREFIX_COLUMN} = ?2, {SEQUENCE_NUMBER_COLUMN} = ?3 \
             WHERE id = ?4",
            t = table.table,
            f = table.sequence_field,
        );
        let outcome = self.conn.execute(
            &sql,
            params![
                value,
                split.as_ref().map(|split| split.prefix.as_str()),
                split.as_ref().map(|split| split.number),
                id.get(),
            ],
        );
        match outcome {
            Ok(0) => Err(SequenceError::InvalidState(format!(
                "{} record {id} does not exist",
                table.table
            ))),
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => Err(SequenceError::Collision {
                value: value.unwrap_or_default().to_string(),
            }),
            Err(err) => Err(err.into()),
        }
    }

    /// A no-op `UPDATE` upgrades a deferred transaction to a writer while it
    /// holds no read snapshot yet; the busy timeout then applies. Outside a
    /// transaction every statement commits on its own and there is nothing to
    /// hold.
    fn lock_for_allocation(&self, table: &SequenceTable) -> SequenceResult<()> {
        if self.conn.is_autocommit() {
            return Ok(());
        }
        self.conn
            .execute(&format!("UPDATE {} SET id = id WHERE 0", table.table), [])?;
        Ok(())
    }

    fn begin_savepoint(&self, name: &str) -> SequenceResult<()> {
        self.conn.execute_batch(&format!("SAVEPOINT {name};"))?;
        Ok(())
    }

    fn release_savepoint(&self, name: &str) -> SequenceResult<()> {
        self.conn.execute_batch(&format!("RELEASE SAVEPOINT {name};"))?;
        Ok(())
    }

    fn rollback_savepoint(&self, name: &str) -> SequenceResult<()> {
        self.conn.execute_batch(&format!(
            "ROLLBACK TO SAVEPOINT {name}; RELEASE SAVEPOINT {name};"
        ))?;
        Ok(())
    }
}

use chrono::NaiveDate;
use folio_core::RecordId;
use rusqlite::types::Value;
use tracing::warn;
use uuid::Uuid;

use crate::probe::Probe;
use crate::scope::ScopeFilter;
use crate::SequenceResult;

/// Column holding the text before the counter of a sequence.
pub const SEQUENCE_PREFIX_COLUMN: &str = "sequence_prefix";
/// Column holding the numeric counter of a sequence.
pub const SEQUENCE_NUMBER_COLUMN: &str = "sequence_number";

/// Column assignment applied to a single row.
pub type FieldWrite = (&'static str, Value);

/// Storage layout of one kind of sequenced record.
///
/// The table must carry an integer `id` primary key, the sequence field, the
/// date field and the [`SEQUENCE_PREFIX_COLUMN`] / [`SEQUENCE_NUMBER_COLUMN`]
/// pair maintained by the allocator.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SequenceTable {
    pub table: &'static str,
    pub sequence_field: &'static str,
    pub date_field: &'static str,
    /// Scope columns leading the probe index.
    pub index_columns: &'static [&'static str],
}

impl SequenceTable {
    pub const fn new(
        table: &'static str,
        sequence_field: &'static str,
        date_field: &'static str,
    ) -> Self {
        Self {
            table,
            sequence_field,
            date_field,
            index_columns: &[],
        }
    }

    pub const fn with_index(mut self, columns: &'static [&'static str]) -> Self {
        self.index_columns = columns;
        self
    }

    /// Index serving the "greatest sequence in scope" lookup.
    pub fn index_statement(&self) -> String {
        let mut columns: Vec<&str> = self.index_columns.to_vec();
        columns.push(SEQUENCE_PREFIX_COLUMN);
        columns.push(SEQUENCE_NUMBER_COLUMN);
        let ordered = columns
            .iter()
            .map(|column| format!("{column} DESC"))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_sequence ON {table} ({ordered});",
            table = self.table,
        )
    }
}

/// Persistence seam used by the allocator.
///
/// Implementations run every call inside the caller's transaction; the
/// allocator only opens savepoints nested in it.
pub trait SequenceStore {
    /// Sequence of the latest peer dated on or before `date`, falling back to
    /// the earliest dated peer.
    fn reference_sequence(
        &self,
        table: &SequenceTable,
        scope: &ScopeFilter,
        exclude: Option<RecordId>,
        date: NaiveDate,
    ) -> SequenceResult<Option<String>>;

    /// Greatest sequence matched by `probe`, locking the row when asked.
    fn last_sequence(&self, table: &SequenceTable, probe: &Probe<'_>)
        -> SequenceResult<Option<String>>;

    /// Flush pending column writes of a record. A write that makes the stored
    /// sequence collide surfaces as [`crate::SequenceError::Collision`].
    fn write_fields(
        &self,
        table: &SequenceTable,
        id: RecordId,
        fields: &[FieldWrite],
    ) -> SequenceResult<()>;

    /// Store `value` as the record's sequence together with its split
    /// columns. Uniqueness violations surface as
    /// [`crate::SequenceError::Collision`].
    fn write_sequence(
        &self,
        table: &SequenceTable,
        id: RecordId,
        value: Option<&str>,
    ) -> SequenceResult<()>;

    /// Take the write lock of the enclosing transaction before the first read
    /// of an allocation, so a concurrent writer is waited for instead of being
    /// missed by an older read snapshot.
    fn lock_for_allocation(&self, table: &SequenceTable) -> SequenceResult<()> {
        let _ = table;
        Ok(())
    }

    fn begin_savepoint(&self, name: &str) -> SequenceResult<()>;

    fn release_savepoint(&self, name: &str) -> SequenceResult<()>;

    /// Undo everything since the savepoint and discard it.
    fn rollback_savepoint(&self, name: &str) -> SequenceResult<()>;
}

/// Nested savepoint that rolls back unless released.
pub struct Savepoint<'s, S: SequenceStore + ?Sized> {
    store: &'s S,
    name: String,
    finished: bool,
}

impl<'s, S: SequenceStore + ?Sized> Savepoint<'s, S> {
    pub fn begin(store: &'s S) -> SequenceResult<Self> {
        let name = format!("folio_seq_{}", Uuid::new_v4().simple());
        store.begin_savepoint(&name)?;
        Ok(Self {
            store,
            name,
            finished: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn release(mut self) -> SequenceResult<()> {
        self.finished = true;
        self.store.release_savepoint(&self.name)
    }

    pub fn rollback(mut self) -> SequenceResult<()> {
        self.finished = true;
        self.store.rollback_savepoint(&self.name)
    }
}

impl<S: SequenceStore + ?Sized> Drop for Savepoint<'_, S> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Err(err) = self.store.rollback_savepoint(&self.name) {
            warn!(savepoint = %self.name, error = %err, "failed to roll back savepoint");
        }
    }
}

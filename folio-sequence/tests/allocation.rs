mod support;

use std::cell::Cell;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use chrono::NaiveDate;
use rusqlite::types::Value;
use rusqlite::{ffi, params, Connection, TransactionBehavior};
use tempfile::tempdir;

use folio_core::{FiscalYearEnd, RecordId};
use folio_sequence::{
    check_sequence_date, FieldWrite, Probe, ScopeFilter, SequenceAllocator, SequenceError,
    SequenceFormat, SequenceResult, SequenceStore, SequenceTable, SqliteSequenceStore,
};

use support::{connect, date, note, open, open_file, rename, stored_name, Invoice};

#[test]
fn empty_journal_uses_default_start() -> Result<()> {
    let conn = open()?;
    let store = SqliteSequenceStore::new(&conn)?;
    let allocator = SequenceAllocator::default();

    let mut first = Invoice::insert(&conn, 1, Some(date(2024, 3, 1)))?;
    let mut second = Invoice::insert(&conn, 1, Some(date(2024, 3, 2)))?;
    assert_eq!(allocator.set_next_sequence(&store, &mut first)?, "00000001");
    assert_eq!(allocator.set_next_sequence(&store, &mut second)?, "00000002");
    assert_eq!(stored_name(&conn, &second)?.as_deref(), Some("00000002"));
    Ok(())
}

#[test]
fn new_year_restarts_the_counter() -> Result<()> {
    let conn = open()?;
    let store = SqliteSequenceStore::new(&conn)?;
    Invoice::insert_named(&conn, 1, date(2023, 12, 31), "INV/2023/0099")?;

    let mut invoice = Invoice::insert(&conn, 1, Some(date(2024, 1, 2)))?;
    let name = SequenceAllocator::default().set_next_sequence(&store, &mut invoice)?;
    assert_eq!(name, "INV/2024/0001");

    let mut late = Invoice::insert(&conn, 1, Some(date(2023, 12, 31)))?;
    let name = SequenceAllocator::default().set_next_sequence(&store, &mut late)?;
    assert_eq!(name, "INV/2023/0100");
    Ok(())
}

#[test]
fn monthly_numbering_restarts_each_month() -> Result<()> {
    let conn = open()?;
    let store = SqliteSequenceStore::new(&conn)?;
    let allocator = SequenceAllocator::default();
    Invoice::insert_named(&conn, 1, date(2024, 1, 15), "MISC/2024/01/0007")?;

    let mut january = Invoice::insert(&conn, 1, Some(date(2024, 1, 20)))?;
    assert_eq!(
        allocator.set_next_sequence(&store, &mut january)?,
        "MISC/2024/01/0008"
    );
    let mut february = Invoice::insert(&conn, 1, Some(date(2024, 2, 3)))?;
    assert_eq!(
        allocator.set_next_sequence(&store, &mut february)?,
        "MISC/2024/02/0001"
    );
    Ok(())
}

#[test]
fn journals_number_independently() -> Result<()> {
    let conn = open()?;
    let store = SqliteSequenceStore::new(&conn)?;
    let allocator = SequenceAllocator::default();
    seed_year(&conn, 1, 3)?;

    let mut other = Invoice::insert(&conn, 2, Some(date(2024, 6, 1)))?;
    assert_eq!(allocator.set_next_sequence(&store, &mut other)?, "00000001");
    let mut same = Invoice::insert(&conn, 1, Some(date(2024, 6, 1)))?;
    assert_eq!(allocator.set_next_sequence(&store, &mut same)?, "INV/2024/0004");
    Ok(())
}

#[test]
fn collision_moves_to_the_next_number() -> Result<()> {
    let conn = open()?;
    seed_year(&conn, 1, 5)?;
    let store = RacingStore {
        inner: SqliteSequenceStore::new(&conn)?,
        conn: &conn,
        raced: Cell::new(false),
    };

    let mut invoice = Invoice::insert(&conn, 1, Some(date(2024, 6, 1)))?;
    invoice.pending = vec![("note", Value::Text("draft-ref".into()))];
    conn.execute_batch("BEGIN")?;
    let name = SequenceAllocator::default().set_next_sequence(&store, &mut invoice)?;
    conn.execute_batch("COMMIT")?;
    assert!(store.raced.get());
    assert_eq!(name, "INV/2024/0007");
    assert_eq!(stored_name(&conn, &invoice)?.as_deref(), Some("INV/2024/0007"));
    assert_eq!(note(&conn, &invoice)?.as_deref(), Some("draft-ref"));

    let taken: i64 = conn.query_row(
        "SELECT COUNT(*) FROM invoices WHERE name = 'INV/2024/0006'",
        [],
        |row| row.get(0),
    )?;
    assert_eq!(taken, 1);
    Ok(())
}

#[test]
fn exhausted_allocation_leaves_record_untouched() -> Result<()> {
    let conn = open()?;
    seed_year(&conn, 1, 2)?;
    let store = CollidingStore {
        inner: SqliteSequenceStore::new(&conn)?,
    };

    let mut invoice = Invoice::insert(&conn, 1, Some(date(2024, 6, 1)))?;
    let err = SequenceAllocator::new(3)
        .set_next_sequence(&store, &mut invoice)
        .unwrap_err();
    match err {
        SequenceError::AllocationExhausted {
            table,
            scope,
            attempts,
        } => {
            assert_eq!(table, "invoices");
            assert_eq!(scope, "journal_id=1");
            assert_eq!(attempts, 3);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(invoice.name.is_none());
    assert!(stored_name(&conn, &invoice)?.is_none());
    Ok(())
}

#[test]
fn storage_failures_are_not_retried() -> Result<()> {
    let conn = open()?;
    seed_year(&conn, 1, 2)?;
    let store = FailingStore {
        inner: SqliteSequenceStore::new(&conn)?,
        writes: Cell::new(0),
    };

    let mut invoice = Invoice::insert(&conn, 1, Some(date(2024, 6, 1)))?;
    let err = SequenceAllocator::default()
        .set_next_sequence(&store, &mut invoice)
        .unwrap_err();
    assert!(matches!(err, SequenceError::Storage(_)), "{err}");
    assert_eq!(store.writes.get(), 1);
    assert!(invoice.name.is_none());
    assert!(stored_name(&conn, &invoice)?.is_none());
    Ok(())
}

#[test]
fn deferred_transaction_waits_for_the_running_writer() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("invoices.db");
    let mut conn = open_file(&path)?;
    seed_year(&conn, 1, 5)?;
    let mut first = Invoice::insert(&conn, 1, Some(date(2024, 6, 1)))?;
    let mut second = Invoice::insert(&conn, 1, Some(date(2024, 6, 2)))?;

    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let name = SequenceAllocator::default()
        .set_next_sequence(&SqliteSequenceStore::new(&tx)?, &mut first)?;
    assert_eq!(name, "INV/2024/0006");

    let other_path = path.clone();
    let waiting = thread::spawn(move || -> Result<String> {
        let mut conn = connect(&other_path)?;
        let tx = conn.transaction()?;
        let name = SequenceAllocator::default()
            .set_next_sequence(&SqliteSequenceStore::new(&tx)?, &mut second)?;
        tx.commit()?;
        Ok(name)
    });
    thread::sleep(Duration::from_millis(200));
    tx.commit()?;

    let name = waiting.join().expect("allocating thread panicked")?;
    assert_eq!(name, "INV/2024/0007");
    Ok(())
}

#[test]
fn edited_sequence_is_continued() -> Result<()> {
    let conn = open()?;
    let store = SqliteSequenceStore::new(&conn)?;
    let mut invoices = seed_year(&conn, 1, 5)?;
    rename(&conn, &mut invoices[4], "INV/2024/0050")?;

    let mut invoice = Invoice::insert(&conn, 1, Some(date(2024, 6, 1)))?;
    let name = SequenceAllocator::default().set_next_sequence(&store, &mut invoice)?;
    assert_eq!(name, "INV/2024/0051");
    Ok(())
}

#[test]
fn lower_prefix_rename_does_not_restart() -> Result<()> {
    let conn = open()?;
    let store = SqliteSequenceStore::new(&conn)?;
    let mut invoices = seed_year(&conn, 1, 5)?;
    rename(&conn, &mut invoices[4], "FACT/2024/0001")?;

    let mut invoice = Invoice::insert(&conn, 1, Some(date(2024, 6, 1)))?;
    let name = SequenceAllocator::default().set_next_sequence(&store, &mut invoice)?;
    assert_eq!(name, "INV/2024/0005");
    Ok(())
}

#[test]
fn record_is_excluded_from_its_own_lookup() -> Result<()> {
    let conn = open()?;
    let store = SqliteSequenceStore::new(&conn)?;
    let allocator = SequenceAllocator::default();
    let mut invoices = seed_year(&conn, 1, 3)?;

    let last = invoices.last_mut().expect("seeded");
    assert_eq!(
        allocator.last_sequence(&store, &*last, false, None, false)?.as_deref(),
        Some("INV/2024/0002")
    );
    assert_eq!(allocator.set_next_sequence(&store, last)?, "INV/2024/0003");
    Ok(())
}

#[test]
fn preview_matches_allocation_without_writing() -> Result<()> {
    let conn = open()?;
    let store = SqliteSequenceStore::new(&conn)?;
    let allocator = SequenceAllocator::default();
    seed_year(&conn, 1, 5)?;

    let mut invoice = Invoice::insert(&conn, 1, Some(date(2024, 6, 1)))?;
    let preview = allocator.preview_next_sequence(&store, &invoice)?;
    assert_eq!(preview, "INV/2024/0006");
    assert!(stored_name(&conn, &invoice)?.is_none());
    assert_eq!(allocator.set_next_sequence(&store, &mut invoice)?, preview);
    Ok(())
}

#[test]
fn allocation_keeps_derived_columns_consistent() -> Result<()> {
    let conn = open()?;
    let store = SqliteSequenceStore::new(&conn)?;
    let allocator = SequenceAllocator::default();
    Invoice::insert_named(&conn, 1, date(2024, 1, 3), "INV/2024/01/0041")?;

    let mut invoice = Invoice::insert(&conn, 1, Some(date(2024, 1, 9)))?;
    let name = allocator.set_next_sequence(&store, &mut invoice)?;
    assert_eq!(SequenceFormat::parse(&name)?.render(), name);

    let (prefix, number, reference): (String, i64, String) = conn.query_row(
        "SELECT sequence_prefix, sequence_number, reference FROM invoices WHERE id = ?1",
        params![invoice.id.expect("stored").get()],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
    )?;
    assert_eq!(prefix, "INV/2024/01/");
    assert_eq!(number as u64, SequenceFormat::parse(&name)?.values().seq);
    assert_eq!(reference, name);
    assert_eq!(invoice.reference.as_deref(), Some(name.as_str()));
    let split = invoice.split.as_ref().expect("split recorded");
    assert_eq!((split.prefix.as_str(), split.number), ("INV/2024/01/", 42));
    Ok(())
}

#[test]
fn undated_records_continue_the_counter() -> Result<()> {
    let conn = open()?;
    let store = SqliteSequenceStore::new(&conn)?;
    seed_year(&conn, 1, 5)?;

    let mut invoice = Invoice::insert(&conn, 1, None)?;
    let name = SequenceAllocator::default().set_next_sequence(&store, &mut invoice)?;
    assert_eq!(name, "INV/2024/0006");
    Ok(())
}

#[test]
fn fiscal_year_range_starting_sequence() -> Result<()> {
    let conn = open()?;
    let store = SqliteSequenceStore::new(&conn)?;
    let allocator = SequenceAllocator::default();

    let mut invoice = Invoice::insert(&conn, 1, Some(date(2024, 5, 10)))?;
    invoice.starting = Some("FACT2023-2024/000".into());
    let err = allocator
        .set_next_sequence(&store, &mut invoice)
        .unwrap_err();
    assert!(matches!(err, SequenceError::FormatMismatch { .. }));

    invoice.fiscal = Some(FiscalYearEnd::new(3, 31)?);
    assert_eq!(
        allocator.set_next_sequence(&store, &mut invoice)?,
        "FACT2024-2025/001"
    );
    Ok(())
}

#[test]
fn unsaved_records_cannot_be_numbered() -> Result<()> {
    let conn = open()?;
    let store = SqliteSequenceStore::new(&conn)?;
    let mut invoice = Invoice::draft(1, Some(date(2024, 1, 1)));
    let err = SequenceAllocator::default()
        .set_next_sequence(&store, &mut invoice)
        .unwrap_err();
    assert!(matches!(err, SequenceError::InvalidState(_)));
    Ok(())
}

#[test]
fn sequence_must_match_record_date() -> Result<()> {
    let mut invoice = Invoice::draft(1, Some(date(2025, 2, 1)));
    invoice.id = Some(RecordId::new(4));
    invoice.name = Some("INV/2024/0001".into());

    let err = check_sequence_date(&invoice, date(1970, 1, 1)).unwrap_err();
    assert!(matches!(err, SequenceError::DateMismatch { .. }));
    assert!(err.to_string().contains("clear the sequence"));

    check_sequence_date(&invoice, date(2025, 12, 31))?;
    invoice.date = Some(date(2024, 11, 30));
    check_sequence_date(&invoice, date(1970, 1, 1))?;
    Ok(())
}

/// Seed `count` yearly invoices `INV/2024/0001..` dated in early January.
fn seed_year(conn: &Connection, journal_id: i64, count: u32) -> Result<Vec<Invoice>> {
    (1..=count)
        .map(|n| {
            Invoice::insert_named(
                conn,
                journal_id,
                date(2024, 1, n),
                &format!("INV/2024/{n:04}"),
            )
        })
        .collect()
}

/// Inserts a competing `INV/2024/0006` right before the first attempt.
struct RacingStore<'c> {
    inner: SqliteSequenceStore<'c>,
    conn: &'c Connection,
    raced: Cell<bool>,
}

impl SequenceStore for RacingStore<'_> {
    fn reference_sequence(
        &self,
        table: &SequenceTable,
        scope: &ScopeFilter,
        exclude: Option<RecordId>,
        date: NaiveDate,
    ) -> SequenceResult<Option<String>> {
        self.inner.reference_sequence(table, scope, exclude, date)
    }

    fn last_sequence(
        &self,
        table: &SequenceTable,
        probe: &Probe<'_>,
    ) -> SequenceResult<Option<String>> {
        self.inner.last_sequence(table, probe)
    }

    fn write_fields(
        &self,
        table: &SequenceTable,
        id: RecordId,
        fields: &[FieldWrite],
    ) -> SequenceResult<()> {
        self.inner.write_fields(table, id, fields)
    }

    fn write_sequence(
        &self,
        table: &SequenceTable,
        id: RecordId,
        value: Option<&str>,
    ) -> SequenceResult<()> {
        self.inner.write_sequence(table, id, value)
    }

    fn begin_savepoint(&self, name: &str) -> SequenceResult<()> {
        if !self.raced.replace(true) {
            self.conn.execute(
                "INSERT INTO invoices (journal_id, date, name, sequence_prefix, sequence_number)
                 VALUES (1, '2024-06-01', 'INV/2024/0006', 'INV/2024/', 6)",
                [],
            )?;
        }
        self.inner.begin_savepoint(name)
    }

    fn release_savepoint(&self, name: &str) -> SequenceResult<()> {
        self.inner.release_savepoint(name)
    }

    fn rollback_savepoint(&self, name: &str) -> SequenceResult<()> {
        self.inner.rollback_savepoint(name)
    }
}

/// Reports every sequence write as already taken.
struct CollidingStore<'c> {
    inner: SqliteSequenceStore<'c>,
}

impl SequenceStore for CollidingStore<'_> {
    fn reference_sequence(
        &self,
        table: &SequenceTable,
        scope: &ScopeFilter,
        exclude: Option<RecordId>,
        date: NaiveDate,
    ) -> SequenceResult<Option<String>> {
        self.inner.reference_sequence(table, scope, exclude, date)
    }

    fn last_sequence(
        &self,
        table: &SequenceTable,
        probe: &Probe<'_>,
    ) -> SequenceResult<Option<String>> {
        self.inner.last_sequence(table, probe)
    }

    fn write_fields(
        &self,
        table: &SequenceTable,
        id: RecordId,
        fields: &[FieldWrite],
    ) -> SequenceResult<()> {
        self.inner.write_fields(table, id, fields)
    }

    fn write_sequence(
        &self,
        _table: &SequenceTable,
        _id: RecordId,
        value: Option<&str>,
    ) -> SequenceResult<()> {
        Err(SequenceError::Collision {
            value: value.unwrap_or_default().to_string(),
        })
    }

    fn begin_savepoint(&self, name: &str) -> SequenceResult<()> {
        self.inner.begin_savepoint(name)
    }

    fn release_savepoint(&self, name: &str) -> SequenceResult<()> {
        self.inner.release_savepoint(name)
    }

    fn rollback_savepoint(&self, name: &str) -> SequenceResult<()> {
        self.inner.rollback_savepoint(name)
    }
}

/// Fails every sequence write with a storage error.
struct FailingStore<'c> {
    inner: SqliteSequenceStore<'c>,
    writes: Cell<u32>,
}

impl SequenceStore for FailingStore<'_> {
    fn reference_sequence(
        &self,
        table: &SequenceTable,
        scope: &ScopeFilter,
        exclude: Option<RecordId>,
        date: NaiveDate,
    ) -> SequenceResult<Option<String>> {
        self.inner.reference_sequence(table, scope, exclude, date)
    }

    fn last_sequence(
        &self,
        table: &SequenceTable,
        probe: &Probe<'_>,
    ) -> SequenceResult<Option<String>> {
        self.inner.last_sequence(table, probe)
    }

    fn write_fields(
        &self,
        table: &SequenceTable,
        id: RecordId,
        fields: &[FieldWrite],
    ) -> SequenceResult<()> {
        self.inner.write_fields(table, id, fields)
    }

    fn write_sequence(
        &self,
        _table: &SequenceTable,
        _id: RecordId,
        _value: Option<&str>,
    ) -> SequenceResult<()> {
        self.writes.set(self.writes.get() + 1);
        Err(SequenceError::Storage(rusqlite::Error::SqliteFailure(
            ffi::Error::new(ffi::SQLITE_IOERR),
            Some("disk I/O error".into()),
        )))
    }

    fn begin_savepoint(&self, name: &str) -> SequenceResult<()> {
        self.inner.begin_savepoint(name)
    }

    fn release_savepoint(&self, name: &str) -> SequenceResult<()> {
        self.inner.release_savepoint(name)
    }

    fn rollback_savepoint(&self, name: &str) -> SequenceResult<()> {
        self.inner.rollback_savepoint(name)
    }
}

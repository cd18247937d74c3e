#![allow(dead_code)]

use std::mem;
use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use chrono::NaiveDate;
use rusqlite::{params, types::Value, Connection};

use folio_core::{FiscalYearEnd, RecordId};
use folio_sequence::{
    split_sequence, FieldWrite, SequenceStore, SequenceTable, SequencedRecord,
    SqliteSequenceStore, SplitSequence,
};

pub const INVOICES: SequenceTable =
    SequenceTable::new("invoices", "name", "date").with_index(&["journal_id"]);

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS invoices (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        journal_id INTEGER NOT NULL,
        date TEXT,
        name TEXT,
        sequence_prefix TEXT,
        sequence_number INTEGER,
        reference TEXT,
        note TEXT
    );
    CREATE UNIQUE INDEX IF NOT EXISTS invoices_journal_name ON invoices (journal_id, name);";

pub fn open() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    create_schema(&conn)?;
    Ok(conn)
}

/// Connection to an on-disk database shared between threads.
pub fn connect(path: &Path) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(Duration::from_secs(5))?;
    conn.execute_batch("PRAGMA journal_mode = WAL;")?;
    Ok(conn)
}

pub fn open_file(path: &Path) -> Result<Connection> {
    let conn = connect(path)?;
    create_schema(&conn)?;
    Ok(conn)
}

fn create_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;
    conn.execute_batch(&INVOICES.index_statement())?;
    Ok(())
}

pub fn note(conn: &Connection, invoice: &Invoice) -> Result<Option<String>> {
    let id = invoice.id.expect("stored invoice");
    Ok(conn.query_row(
        "SELECT note FROM invoices WHERE id = ?1",
        params![id.get()],
        |row| row.get(0),
    )?)
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Minimal sequenced record numbered per journal.
#[derive(Clone, Debug, Default)]
pub struct Invoice {
    pub id: Option<RecordId>,
    pub journal_id: i64,
    pub date: Option<NaiveDate>,
    pub name: Option<String>,
    pub reference: Option<String>,
    pub split: Option<SplitSequence>,
    pub fiscal: Option<FiscalYearEnd>,
    pub starting: Option<String>,
    /// Column writes flushed before the sequence is allocated.
    pub pending: Vec<FieldWrite>,
}

impl Invoice {
    pub fn draft(journal_id: i64, date: Option<NaiveDate>) -> Self {
        Self {
            journal_id,
            date,
            ..Self::default()
        }
    }

    /// Store an unnumbered invoice.
    pub fn insert(conn: &Connection, journal_id: i64, date: Option<NaiveDate>) -> Result<Self> {
        conn.execute(
            "INSERT INTO invoices (journal_id, date) VALUES (?1, ?2)",
            params![journal_id, date.map(|d| d.to_string())],
        )?;
        Ok(Self {
            id: Some(RecordId::new(conn.last_insert_rowid())),
            ..Self::draft(journal_id, date)
        })
    }

    /// Store an invoice that already carries `name`.
    pub fn insert_named(
        conn: &Connection,
        journal_id: i64,
        date: NaiveDate,
        name: &str,
    ) -> Result<Self> {
        let mut invoice = Self::insert(conn, journal_id, Some(date))?;
        rename(conn, &mut invoice, name)?;
        Ok(invoice)
    }
}

pub fn rename(conn: &Connection, invoice: &mut Invoice, name: &str) -> Result<()> {
    let store = SqliteSequenceStore::new(conn)?;
    let id = invoice.id.expect("stored invoice");
    store.write_sequence(&INVOICES, id, Some(name))?;
    invoice.name = Some(name.to_string());
    invoice.split = Some(split_sequence(name));
    Ok(())
}

pub fn stored_name(conn: &Connection, invoice: &Invoice) -> Result<Option<String>> {
    let id = invoice.id.expect("stored invoice");
    Ok(conn.query_row(
        "SELECT name FROM invoices WHERE id = ?1",
        params![id.get()],
        |row| row.get(0),
    )?)
}

impl SequencedRecord for Invoice {
    fn table(&self) -> &'static SequenceTable {
        &INVOICES
    }

    fn id(&self) -> Option<RecordId> {
        self.id
    }

    fn sequence(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn assign_sequence(&mut self, value: Option<String>) {
        self.name = value;
    }

    fn sequence_date(&self) -> Option<NaiveDate> {
        self.date
    }

    fn scope_key(&self) -> Vec<(&'static str, Value)> {
        vec![("journal_id", Value::Integer(self.journal_id))]
    }

    fn fiscal_year_end(&self) -> Option<FiscalYearEnd> {
        self.fiscal
    }

    fn starting_sequence(&self) -> String {
        self.starting
            .clone()
            .unwrap_or_else(|| folio_sequence::DEFAULT_STARTING_SEQUENCE.to_string())
    }

    fn take_pending_writes(&mut self) -> Vec<FieldWrite> {
        mem::take(&mut self.pending)
    }

    fn invalidate_dependents(&mut self) {
        self.reference = None;
    }

    fn set_split_sequence(&mut self, split: SplitSequence) {
        self.split = Some(split);
    }

    fn refresh_dependents(&mut self) -> Vec<FieldWrite> {
        self.reference = self.name.clone();
        vec![(
            "reference",
            self.reference.clone().map_or(Value::Null, Value::Text),
        )]
    }
}

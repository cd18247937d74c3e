use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chrono::NaiveDate;
use folio_config::FolioConfig;
use folio_core::{CompanyId, FiscalYearEnd, JournalId, RecordId};
use folio_sequence::{
    check_sequence_date, is_end_of_chain, split_sequence, SequenceAllocator, SequenceStore,
    SequencedRecord, SqliteSequenceStore,
};
use rusqlite::types::Value;
use rusqlite::{
    params, params_from_iter, Connection, OptionalExtension, Transaction, TransactionBehavior,
};
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::entry::{EntryNumbering, JOURNAL_ENTRIES};
use crate::resequence::{plan_resequence, Renumbering};
use crate::{
    Company, EntryKind, EntryQuery, EntryState, Journal, JournalEntry, JournalKind, LedgerError,
    LedgerResult,
};

const LEDGER_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS companies (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    fiscal_year_end_month INTEGER NOT NULL DEFAULT 12,
    fiscal_year_end_day INTEGER NOT NULL DEFAULT 31
);
CREATE TABLE IF NOT EXISTS journals (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    company_id INTEGER NOT NULL REFERENCES companies(id),
    code TEXT NOT NULL,
    name TEXT NOT NULL,
    kind TEXT NOT NULL,
    refund_sequence INTEGER NOT NULL DEFAULT 0,
    UNIQUE (company_id, code)
);
CREATE TABLE IF NOT EXISTS journal_entries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    journal_id INTEGER NOT NULL REFERENCES journals(id),
    date TEXT NOT NULL,
    kind TEXT NOT NULL,
    amount TEXT NOT NULL,
    state TEXT NOT NULL DEFAULT 'draft',
    name TEXT,
    sequence_prefix TEXT,
    sequence_number INTEGER,
    payment_reference TEXT
);
CREATE UNIQUE INDEX IF NOT EXISTS journal_entries_unique_name
    ON journal_entries(journal_id, name) WHERE state = 'posted';
CREATE INDEX IF NOT EXISTS journal_entries_idx_date
    ON journal_entries(journal_id, date);
"#;

const ENTRY_COLUMNS: &str = "id, journal_id, date, kind, amount, state, name, \
     sequence_prefix, sequence_number, payment_reference";

/// SQLite-backed ledger numbering its entries on posting.
///
/// Every operation opens its own connection; writes run in `IMMEDIATE`
/// transactions so concurrent posters queue on the database write lock.
#[derive(Clone, Debug)]
pub struct SqliteLedger {
    path: PathBuf,
    busy_timeout: Duration,
    allocator: SequenceAllocator,
    constraint_start_date: NaiveDate,
}

impl SqliteLedger {
    pub fn new(path: impl Into<PathBuf>) -> LedgerResult<Self> {
        let defaults = FolioConfig::default();
        Self::with_settings(
            path.into(),
            defaults.database.busy_timeout(),
            SequenceAllocator::from_config(&defaults.sequence),
            defaults.sequence.constraint_start_date,
        )
    }

    pub fn from_config(config: &FolioConfig) -> LedgerResult<Self> {
        Self::with_settings(
            config.database.path.clone(),
            config.database.busy_timeout(),
            SequenceAllocator::from_config(&config.sequence),
            config.sequence.constraint_start_date,
        )
    }

    fn with_settings(
        path: PathBuf,
        busy_timeout: Duration,
        allocator: SequenceAllocator,
        constraint_start_date: NaiveDate,
    ) -> LedgerResult<Self> {
        let ledger = Self {
            path,
            busy_timeout,
            allocator,
            constraint_start_date,
        };
        ledger.initialize_schema()?;
        Ok(ledger)
    }

    fn initialize_schema(&self) -> LedgerResult<()> {
        let conn = self.connect()?;
        conn.execute_batch(LEDGER_SCHEMA)?;
        conn.execute_batch(&JOURNAL_ENTRIES.index_statement())?;
        Ok(())
    }

    fn connect(&self) -> LedgerResult<Connection> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(self.busy_timeout)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL; PRAGMA foreign_keys = ON;",
        )?;
        Ok(conn)
    }

    pub fn create_company(
        &self,
        name: &str,
        fiscal_year_end: FiscalYearEnd,
    ) -> LedgerResult<Company> {
        let conn = self.connect()?;
        conn.execute(
            "INSERT INTO companies (name, fiscal_year_end_month, fiscal_year_end_day)
             VALUES (?1, ?2, ?3)",
            params![name, fiscal_year_end.month, fiscal_year_end.day],
        )?;
        Ok(Company {
            id: CompanyId::new(conn.last_insert_rowid()),
            name: name.to_string(),
            fiscal_year_end,
        })
    }

    pub fn create_journal(
        &self,
        company_id: CompanyId,
        code: &str,
        name: &str,
        kind: JournalKind,
        refund_sequence: bool,
    ) -> LedgerResult<Journal> {
        let conn = self.connect()?;
        load_company(&conn, company_id)?;
        conn.execute(
            "INSERT INTO journals (company_id, code, name, kind, refund_sequence)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![company_id.get(), code, name, kind.as_str(), refund_sequence],
        )?;
        Ok(Journal {
            id: JournalId::new(conn.last_insert_rowid()),
            company_id,
            code: code.to_string(),
            name: name.to_string(),
            kind,
            refund_sequence,
        })
    }

    /// Store a draft entry without a name.
    pub fn create_entry(
        &self,
        journal_id: JournalId,
        date: NaiveDate,
        kind: EntryKind,
        amount: Decimal,
    ) -> LedgerResult<JournalEntry> {
        let conn = self.connect()?;
        load_journal(&conn, journal_id)?;
        conn.execute(
            "INSERT INTO journal_entries (journal_id, date, kind, amount, state)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                journal_id.get(),
                date.to_string(),
                kind.as_str(),
                amount.to_string(),
                EntryState::Draft.as_str()
            ],
        )?;
        Ok(JournalEntry {
            id: RecordId::new(conn.last_insert_rowid()),
            journal_id,
            date,
            kind,
            amount,
            state: EntryState::Draft,
            name: None,
            sequence_prefix: None,
            sequence_number: None,
            payment_reference: None,
        })
    }

    pub fn company(&self, id: CompanyId) -> LedgerResult<Company> {
        load_company(&self.connect()?, id)
    }

    pub fn journal(&self, id: JournalId) -> LedgerResult<Journal> {
        load_journal(&self.connect()?, id)
    }

    pub fn entry(&self, id: RecordId) -> LedgerResult<JournalEntry> {
        load_entry(&self.connect()?, id)
    }

    pub fn entries(&self, query: EntryQuery) -> LedgerResult<Vec<JournalEntry>> {
        let conn = self.connect()?;
        let mut sql = format!(
            "SELECT {ENTRY_COLUMNS} FROM journal_entries
             WHERE (?1 IS NULL OR journal_id = ?1)
               AND (?2 IS NULL OR state = ?2)
               AND (?3 IS NULL OR kind = ?3)
               AND (?4 IS NULL OR date >= ?4)
               AND (?5 IS NULL OR date <= ?5)"
        );
        sql.push_str(if query.ascending {
            " ORDER BY date ASC, id ASC"
        } else {
            " ORDER BY date DESC, id DESC"
        });
        if query.limit.is_some() {
            sql.push_str(" LIMIT ?6");
        }

        let mut params: Vec<Value> = Vec::with_capacity(6);
        params.push(optional_int(query.journal.map(JournalId::get)));
        params.push(optional_text(query.state.map(|state| state.as_str().to_string())));
        params.push(optional_text(query.kind.map(|kind| kind.as_str().to_string())));
        params.push(optional_text(query.start_date.map(|date| date.to_string())));
        params.push(optional_text(query.end_date.map(|date| date.to_string())));
        if let Some(limit) = query.limit {
            params.push(Value::Integer(limit as i64));
        }

        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(params.iter()))?;
        let mut entries = Vec::new();
        while let Some(row) = rows.next()? {
            entries.push(row_to_entry(row)?);
        }
        Ok(entries)
    }

    /// Post a draft entry, naming it unless it already carries a name.
    pub fn post(&self, id: RecordId) -> LedgerResult<JournalEntry> {
        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut entry = load_entry(&tx, id)?;
        if entry.is_posted() {
            return Err(LedgerError::InvalidState(format!(
                "entry {id} is already posted"
            )));
        }
        let journal = load_journal(&tx, entry.journal_id)?;
        let company = load_company(&tx, journal.company_id)?;
        let store = SqliteSequenceStore::new(&tx)?;

        entry.state = EntryState::Posted;
        let mut numbering = EntryNumbering::new(&mut entry, &journal, &company)
            .with_pending("state", EntryState::Posted.as_str().to_string());
        if numbering.sequence().map_or(true, str::is_empty) {
            self.allocator.set_next_sequence(&store, &mut numbering)?;
        } else {
            let pending = numbering.take_pending_writes();
            store.write_fields(&JOURNAL_ENTRIES, id, &pending)?;
        }
        check_sequence_date(&numbering, self.constraint_start_date)?;
        tx.commit()?;

        info!(entry = %id, name = ?entry.name, journal = %journal.code, "posted entry");
        Ok(entry)
    }

    /// Name [`Self::post`] would assign right now, computed without locks.
    pub fn preview_name(&self, id: RecordId) -> LedgerResult<String> {
        let conn = self.connect()?;
        let mut entry = load_entry(&conn, id)?;
        if let Some(name) = entry.name.clone().filter(|name| !name.is_empty()) {
            return Ok(name);
        }
        let journal = load_journal(&conn, entry.journal_id)?;
        let company = load_company(&conn, journal.company_id)?;
        let store = SqliteSequenceStore::new(&conn)?;
        let numbering = EntryNumbering::new(&mut entry, &journal, &company);
        Ok(self.allocator.preview_next_sequence(&store, &numbering)?)
    }

    /// Replace the name of an entry; an empty name clears it. Later postings
    /// continue from the edited value.
    pub fn rename(&self, id: RecordId, name: &str) -> LedgerResult<JournalEntry> {
        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut entry = load_entry(&tx, id)?;
        let journal = load_journal(&tx, entry.journal_id)?;
        let company = load_company(&tx, journal.company_id)?;
        let store = SqliteSequenceStore::new(&tx)?;

        let name = Some(name.trim()).filter(|name| !name.is_empty());
        if name.is_none() && entry.is_posted() {
            return Err(LedgerError::InvalidState(format!(
                "posted entry {id} must keep a name"
            )));
        }
        store.write_sequence(&JOURNAL_ENTRIES, id, name)?;
        let mut numbering = EntryNumbering::new(&mut entry, &journal, &company);
        numbering.invalidate_dependents();
        numbering.assign_sequence(name.map(str::to_string));
        if let Some(name) = name {
            numbering.set_split_sequence(split_sequence(name));
        }
        let dependents = numbering.refresh_dependents();
        store.write_fields(&JOURNAL_ENTRIES, id, &dependents)?;
        check_sequence_date(&numbering, self.constraint_start_date)?;
        tx.commit()?;

        if name.is_none() {
            entry.sequence_prefix = None;
            entry.sequence_number = None;
        }
        info!(entry = %id, name = ?entry.name, "renamed entry");
        Ok(entry)
    }

    /// Move an entry to another date; its name must still match the new period.
    pub fn change_date(&self, id: RecordId, date: NaiveDate) -> LedgerResult<JournalEntry> {
        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut entry = load_entry(&tx, id)?;
        let journal = load_journal(&tx, entry.journal_id)?;
        let company = load_company(&tx, journal.company_id)?;

        entry.date = date;
        check_sequence_date(
            &EntryNumbering::new(&mut entry, &journal, &company),
            self.constraint_start_date,
        )?;
        tx.execute(
            "UPDATE journal_entries SET date = ?1 WHERE id = ?2",
            params![date.to_string(), id.get()],
        )?;
        tx.commit()?;
        Ok(entry)
    }

    /// Delete entries. Named entries may only go when they sit at the end of
    /// their sequence chain, so no gap is left behind.
    pub fn delete(&self, ids: &[RecordId]) -> LedgerResult<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut entries = ids
            .iter()
            .map(|id| load_entry(&tx, *id))
            .collect::<LedgerResult<Vec<_>>>()?;
        let context = load_single_journal(&tx, &entries)?;
        {
            let (journal, company) = &context;
            let store = SqliteSequenceStore::new(&tx)?;
            let numberings: Vec<EntryNumbering<'_>> = entries
                .iter_mut()
                .map(|entry| EntryNumbering::new(entry, journal, company))
                .collect();
            if !is_end_of_chain(&store, &numberings)? {
                warn!(
                    journal = %journal.code,
                    count = ids.len(),
                    "refused to delete inside a sequence chain"
                );
                return Err(LedgerError::InvalidState(
                    "entries are not the last of their sequence chain; \
                     delete from the latest number backwards"
                        .to_string(),
                ));
            }
        }
        let placeholders = vec!["?"; ids.len()].join(", ");
        tx.execute(
            &format!("DELETE FROM journal_entries WHERE id IN ({placeholders})"),
            params_from_iter(ids.iter().map(|id| id.get())),
        )?;
        tx.commit()?;
        info!(count = ids.len(), "deleted entries");
        Ok(())
    }

    /// Renumber posted entries of one journal, starting from `first_name`.
    pub fn resequence(
        &self,
        ids: &[RecordId],
        first_name: &str,
    ) -> LedgerResult<Vec<Renumbering>> {
        let mut conn = self.connect()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut entries = ids
            .iter()
            .map(|id| load_entry(&tx, *id))
            .collect::<LedgerResult<Vec<_>>>()?;
        if let Some(draft) = entries.iter().find(|entry| !entry.is_posted()) {
            return Err(LedgerError::InvalidState(format!(
                "entry {} is not posted",
                draft.id
            )));
        }
        let (journal, company) = load_single_journal(&tx, &entries)?;
        let plan = plan_resequence(&entries, first_name, company.fiscal_year_end)?;
        let store = SqliteSequenceStore::new(&tx)?;

        // Names are freed first so the batch may swap values among itself.
        for item in &plan {
            store.write_sequence(&JOURNAL_ENTRIES, item.id, None)?;
        }
        for item in &plan {
            let Some(entry) = entries.iter_mut().find(|entry| entry.id == item.id) else {
                continue;
            };
            store.write_sequence(&JOURNAL_ENTRIES, item.id, Some(&item.new_name))?;
            let mut numbering = EntryNumbering::new(entry, &journal, &company);
            numbering.assign_sequence(Some(item.new_name.clone()));
            let dependents = numbering.refresh_dependents();
            store.write_fields(&JOURNAL_ENTRIES, item.id, &dependents)?;
            check_sequence_date(&numbering, self.constraint_start_date)?;
        }
        tx.commit()?;

        info!(
            journal = %journal.code,
            count = plan.len(),
            first = %first_name,
            "resequenced entries"
        );
        Ok(plan)
    }
}

fn load_company(conn: &Connection, id: CompanyId) -> LedgerResult<Company> {
    conn.query_row(
        "SELECT id, name, fiscal_year_end_month, fiscal_year_end_day FROM companies WHERE id = ?1",
        params![id.get()],
        |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, u32>(2)?,
                row.get::<_, u32>(3)?,
            ))
        },
    )
    .optional()?
    .ok_or_else(|| LedgerError::NotFound(format!("company {id}")))
    .and_then(|(id, name, month, day)| {
        let fiscal_year_end = FiscalYearEnd::new(month, day)
            .map_err(|err| LedgerError::Serialization(format!("company {id}: {err}")))?;
        Ok(Company {
            id: CompanyId::new(id),
            name,
            fiscal_year_end,
        })
    })
}

fn load_journal(conn: &Connection, id: JournalId) -> LedgerResult<Journal> {
    let row = conn
        .query_row(
            "SELECT id, company_id, code, name, kind, refund_sequence FROM journals WHERE id = ?1",
            params![id.get()],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, bool>(5)?,
                ))
            },
        )
        .optional()?;
    let Some((id, company_id, code, name, kind, refund_sequence)) = row else {
        return Err(LedgerError::NotFound(format!("journal {id}")));
    };
    Ok(Journal {
        id: JournalId::new(id),
        company_id: CompanyId::new(company_id),
        code,
        name,
        kind: JournalKind::from_str(&kind).map_err(LedgerError::Serialization)?,
        refund_sequence,
    })
}

fn load_entry(conn: &Connection, id: RecordId) -> LedgerResult<JournalEntry> {
    let mut stmt =
        conn.prepare(&format!("SELECT {ENTRY_COLUMNS} FROM journal_entries WHERE id = ?1"))?;
    let mut rows = stmt.query(params![id.get()])?;
    match rows.next()? {
        Some(row) => row_to_entry(row),
        None => Err(LedgerError::NotFound(format!("entry {id}"))),
    }
}

/// Journal and company shared by every entry of a batch.
fn load_single_journal(
    tx: &Transaction<'_>,
    entries: &[JournalEntry],
) -> LedgerResult<(Journal, Company)> {
    let Some(first) = entries.first() else {
        return Err(LedgerError::InvalidState("no entries given".to_string()));
    };
    if entries.iter().any(|entry| entry.journal_id != first.journal_id) {
        return Err(LedgerError::InvalidState(
            "entries belong to different journals".to_string(),
        ));
    }
    let journal = load_journal(tx, first.journal_id)?;
    let company = load_company(tx, journal.company_id)?;
    Ok((journal, company))
}

fn optional_text(value: Option<String>) -> Value {
    value.map(Value::from).unwrap_or(Value::Null)
}

fn optional_int(value: Option<i64>) -> Value {
    value.map(Value::Integer).unwrap_or(Value::Null)
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> LedgerResult<JournalEntry> {
    let id: i64 = row.get(0)?;
    let journal_id: i64 = row.get(1)?;
    let date_str: String = row.get(2)?;
    let kind_str: String = row.get(3)?;
    let amount_str: String = row.get(4)?;
    let state_str: String = row.get(5)?;

    let date = NaiveDate::from_str(&date_str)
        .map_err(|err| LedgerError::Serialization(format!("invalid date {date_str}: {err}")))?;
    let amount = Decimal::from_str(&amount_str).map_err(|err| {
        LedgerError::Serialization(format!("invalid decimal {amount_str}: {err}"))
    })?;
    let kind = EntryKind::from_str(&kind_str).map_err(LedgerError::Serialization)?;
    let state = EntryState::from_str(&state_str).map_err(LedgerError::Serialization)?;

    Ok(JournalEntry {
        id: RecordId::new(id),
        journal_id: JournalId::new(journal_id),
        date,
        kind,
        amount,
        state,
        name: row.get(6)?,
        sequence_prefix: row.get(7)?,
        sequence_number: row.get(8)?,
        payment_reference: row.get(9)?,
    })
}

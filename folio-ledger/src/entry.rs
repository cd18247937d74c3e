use std::fmt;
use std::mem;
use std::str::FromStr;

use chrono::NaiveDate;
use folio_core::{FiscalYearEnd, JournalId, RecordId};
use folio_sequence::{FieldWrite, ScopeFilter, SequenceTable, SequencedRecord, SplitSequence};
use rusqlite::types::Value;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::{Company, Journal};

/// Storage layout of journal entries, numbered per journal.
pub const JOURNAL_ENTRIES: SequenceTable =
    SequenceTable::new("journal_entries", "name", "date").with_index(&["journal_id"]);

/// A dated accounting document, named when posted.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub id: RecordId,
    pub journal_id: JournalId,
    pub date: NaiveDate,
    pub kind: EntryKind,
    pub amount: Decimal,
    pub state: EntryState,
    pub name: Option<String>,
    pub sequence_prefix: Option<String>,
    pub sequence_number: Option<i64>,
    /// Reference customers quote when paying; the entry name for customer invoices.
    pub payment_reference: Option<String>,
}

impl JournalEntry {
    pub fn is_posted(&self) -> bool {
        self.state == EntryState::Posted
    }
}

/// Business nature of an entry.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    Entry,
    OutInvoice,
    OutRefund,
    InInvoice,
    InRefund,
}

impl EntryKind {
    pub const REFUNDS: [EntryKind; 2] = [EntryKind::OutRefund, EntryKind::InRefund];

    pub fn as_str(self) -> &'static str {
        match self {
            EntryKind::Entry => "entry",
            EntryKind::OutInvoice => "out_invoice",
            EntryKind::OutRefund => "out_refund",
            EntryKind::InInvoice => "in_invoice",
            EntryKind::InRefund => "in_refund",
        }
    }

    pub fn is_refund(self) -> bool {
        Self::REFUNDS.contains(&self)
    }

    /// Customer invoices are paid against their own name.
    pub fn uses_name_as_reference(self) -> bool {
        self == EntryKind::OutInvoice
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "entry" => Ok(EntryKind::Entry),
            "out_invoice" => Ok(EntryKind::OutInvoice),
            "out_refund" => Ok(EntryKind::OutRefund),
            "in_invoice" => Ok(EntryKind::InInvoice),
            "in_refund" => Ok(EntryKind::InRefund),
            other => Err(format!("unknown entry kind '{other}'")),
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    Draft,
    Posted,
}

impl EntryState {
    pub fn as_str(self) -> &'static str {
        match self {
            EntryState::Draft => "draft",
            EntryState::Posted => "posted",
        }
    }
}

impl fmt::Display for EntryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryState {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "draft" => Ok(EntryState::Draft),
            "posted" => Ok(EntryState::Posted),
            other => Err(format!("unknown entry state '{other}'")),
        }
    }
}

/// An entry seen through its journal and company while it is being numbered.
pub(crate) struct EntryNumbering<'a> {
    entry: &'a mut JournalEntry,
    journal: &'a Journal,
    company: &'a Company,
    pending: Vec<FieldWrite>,
}

impl<'a> EntryNumbering<'a> {
    pub(crate) fn new(
        entry: &'a mut JournalEntry,
        journal: &'a Journal,
        company: &'a Company,
    ) -> Self {
        Self {
            entry,
            journal,
            company,
            pending: Vec::new(),
        }
    }

    /// Queue a column write flushed before the name is written.
    pub(crate) fn with_pending(mut self, column: &'static str, value: impl Into<Value>) -> Self {
        self.pending.push((column, value.into()));
        self
    }
}

impl SequencedRecord for EntryNumbering<'_> {
    fn table(&self) -> &'static SequenceTable {
        &JOURNAL_ENTRIES
    }

    fn id(&self) -> Option<RecordId> {
        Some(self.entry.id)
    }

    fn sequence(&self) -> Option<&str> {
        self.entry.name.as_deref()
    }

    fn assign_sequence(&mut self, value: Option<String>) {
        self.entry.name = value;
    }

    fn sequence_date(&self) -> Option<NaiveDate> {
        Some(self.entry.date)
    }

    fn scope_key(&self) -> Vec<(&'static str, Value)> {
        vec![("journal_id", Value::Integer(self.entry.journal_id.get()))]
    }

    fn fiscal_year_end(&self) -> Option<FiscalYearEnd> {
        Some(self.company.fiscal_year_end)
    }

    fn previous_sequence_scope(&self, _relaxed: bool, scope: ScopeFilter) -> ScopeFilter {
        if !self.journal.refund_sequence {
            return scope;
        }
        let refunds = EntryKind::REFUNDS.map(|kind| kind.as_str().to_string());
        scope.with_in("kind", refunds, !self.entry.kind.is_refund())
    }

    fn starting_sequence(&self) -> String {
        self.journal
            .starting_sequence(self.entry.date, self.entry.kind)
    }

    fn take_pending_writes(&mut self) -> Vec<FieldWrite> {
        mem::take(&mut self.pending)
    }

    fn invalidate_dependents(&mut self) {
        if self.entry.kind.uses_name_as_reference() {
            self.entry.payment_reference = None;
        }
    }

    fn set_split_sequence(&mut self, split: SplitSequence) {
        self.entry.sequence_prefix = Some(split.prefix);
        self.entry.sequence_number = Some(split.number);
    }

    fn refresh_dependents(&mut self) -> Vec<FieldWrite> {
        if !self.entry.kind.uses_name_as_reference() {
            return Vec::new();
        }
        self.entry.payment_reference = self.entry.name.clone();
        let value = self
            .entry
            .payment_reference
            .clone()
            .map_or(Value::Null, Value::Text);
        vec![("payment_reference", value)]
    }

    fn describe_scope(&self) -> String {
        format!("journal {}", self.journal.code)
    }
}

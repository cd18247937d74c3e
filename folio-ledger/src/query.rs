use chrono::NaiveDate;
use folio_core::JournalId;

use crate::{EntryKind, EntryState};

/// Filter describing which journal entries to load from storage.
#[derive(Clone, Debug, Default)]
pub struct EntryQuery {
    pub journal: Option<JournalId>,
    pub state: Option<EntryState>,
    pub kind: Option<EntryKind>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub limit: Option<usize>,
    pub ascending: bool,
}

impl EntryQuery {
    pub fn with_journal(mut self, journal: JournalId) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn with_state(mut self, state: EntryState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn with_kind(mut self, kind: EntryKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn with_date_range(mut self, start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        self.start_date = start;
        self.end_date = end;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Oldest entries first (by date, then id).
    pub fn ascending(mut self) -> Self {
        self.ascending = true;
        self
    }
}

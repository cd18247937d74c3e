//! Companies, journals and journal entries numbered on posting.

mod entry;
mod error;
mod journal;
mod query;
mod resequence;
mod sqlite;

pub use entry::{EntryKind, EntryState, JournalEntry, JOURNAL_ENTRIES};
pub use error::{LedgerError, LedgerResult};
pub use journal::{Company, Journal, JournalKind};
pub use query::EntryQuery;
pub use resequence::{plan_resequence, Renumbering};
pub use sqlite::SqliteLedger;

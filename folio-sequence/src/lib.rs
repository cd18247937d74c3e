//! Editable, gap-free sequence numbering for stored records.
//!
//! A record asks the [`SequenceAllocator`] for its next sequence at commit
//! time. The allocator looks up the greatest sequence among the record's
//! peers, decomposes it with [`SequenceFormat`], increments the counter and
//! writes the result, retrying when a concurrent writer took the value first.
//! Edited sequences are honoured: the next allocation continues from them.

mod allocator;
mod chain;
mod constraint;
mod error;
mod format;
mod probe;
mod record;
mod scope;
mod sqlite;
mod store;

pub use allocator::{find_last_sequence, SequenceAllocator};
pub use chain::{is_end_of_chain, is_last_in_chain};
pub use constraint::check_sequence_date;
pub use error::{SequenceError, SequenceResult};
pub use format::{
    deduce_reset, split_sequence, FormatValues, Placeholder, SequenceFormat, SequenceReset,
    SequenceTemplate, SplitSequence, DEFAULT_SEQ_WIDTH,
};
pub use probe::{reference_statement, Probe};
pub use record::{SequencedRecord, DEFAULT_STARTING_SEQUENCE};
pub use scope::{resolve_scope, ScopeFilter};
pub use sqlite::{is_unique_violation, register_sequence_functions, SqliteSequenceStore};
pub use store::{
    FieldWrite, Savepoint, SequenceStore, SequenceTable, SEQUENCE_NUMBER_COLUMN,
    SEQUENCE_PREFIX_COLUMN,
};

use folio_config::{SequenceConfig, DEFAULT_MAX_ATTEMPTS};
use tracing::{debug, info, warn};

use crate::format::{split_sequence, SequenceFormat};
use crate::probe::Probe;
use crate::record::SequencedRecord;
use crate::scope::resolve_scope;
use crate::store::{Savepoint, SequenceStore};
use crate::{SequenceError, SequenceResult};

/// Greatest sequence among the peers of `record`, excluding the record itself.
///
/// `with_prefix` narrows the lookup to one stored prefix; `lock` takes the
/// write lock on the matched row.
pub fn find_last_sequence<S, R>(
    store: &S,
    record: &R,
    relaxed: bool,
    with_prefix: Option<&str>,
    lock: bool,
) -> SequenceResult<Option<String>>
where
    S: SequenceStore + ?Sized,
    R: SequencedRecord + ?Sized,
{
    let table = record.table();
    let scope = resolve_scope(store, record, relaxed)?;
    let probe = Probe::new(&scope)
        .excluding(record.id())
        .with_prefix(with_prefix)
        .locking(lock);
    let found = store.last_sequence(table, &probe)?;
    debug!(
        table = table.table,
        relaxed,
        lock,
        found = ?found,
        "probed previous sequence"
    );
    Ok(found)
}

/// Assigns gap-free sequences inside the caller's transaction.
#[derive(Clone, Copy, Debug)]
pub struct SequenceAllocator {
    max_attempts: u32,
}

impl Default for SequenceAllocator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS)
    }
}

impl SequenceAllocator {
    /// Create an allocator giving up after `max_attempts` collisions.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn from_config(config: &SequenceConfig) -> Self {
        Self::new(config.max_attempts)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn last_sequence<S, R>(
        &self,
        store: &S,
        record: &R,
        relaxed: bool,
        with_prefix: Option<&str>,
        lock: bool,
    ) -> SequenceResult<Option<String>>
    where
        S: SequenceStore + ?Sized,
        R: SequencedRecord + ?Sized,
    {
        find_last_sequence(store, record, relaxed, with_prefix, lock)
    }

    /// Format whose next increment is the value to allocate.
    ///
    /// A strict hit is continued as is. A relaxed hit or the starting sequence
    /// only lends its template: the counter restarts and the period comes from
    /// the record's date.
    pub fn next_format<S, R>(
        &self,
        store: &S,
        record: &R,
        lock: bool,
    ) -> SequenceResult<SequenceFormat>
    where
        S: SequenceStore + ?Sized,
        R: SequencedRecord + ?Sized,
    {
        let (source, restart) = match self.last_sequence(store, record, false, None, lock)? {
            Some(strict) => (strict, false),
            None => match self.last_sequence(store, record, true, None, lock)? {
                Some(relaxed) => (relaxed, true),
                None => (record.starting_sequence(), true),
            },
        };
        let date = record.sequence_date();
        let mut format = SequenceFormat::parse_for(&source, date)?;
        if restart {
            format.restart(date, record.fiscal_year_end())?;
        }
        Ok(format)
    }

    /// Value [`Self::set_next_sequence`] would write, computed without locks.
    pub fn preview_next_sequence<S, R>(&self, store: &S, record: &R) -> SequenceResult<String>
    where
        S: SequenceStore + ?Sized,
        R: SequencedRecord + ?Sized,
    {
        let mut format = self.next_format(store, record, false)?;
        format.values_mut().seq += 1;
        Ok(format.render())
    }

    /// Allocate and store the next sequence of `record`.
    ///
    /// Must run inside a transaction that has not read yet, or one opened
    /// `IMMEDIATE`: the write lock is taken before the previous sequence is
    /// looked up, so concurrent allocators queue and each sees the committed
    /// maximum. Each attempt is isolated in a savepoint; on a uniqueness
    /// collision the counter moves on. The record keeps its previous value
    /// when allocation fails.
    pub fn set_next_sequence<S, R>(&self, store: &S, record: &mut R) -> SequenceResult<String>
    where
        S: SequenceStore + ?Sized,
        R: SequencedRecord + ?Sized,
    {
        let table = record.table();
        let id = record.id().ok_or_else(|| {
            SequenceError::InvalidState(format!(
                "{} record must be stored before it is numbered",
                table.table
            ))
        })?;
        store.lock_for_allocation(table)?;
        let mut format = self.next_format(store, &*record, true)?;

        let pending = record.take_pending_writes();
        store.write_fields(table, id, &pending)?;
        record.invalidate_dependents();

        for attempt in 1..=self.max_attempts {
            format.values_mut().seq += 1;
            let candidate = format.render();
            let savepoint = Savepoint::begin(store)?;
            match store.write_sequence(table, id, Some(&candidate)) {
                Ok(()) => {
                    savepoint.release()?;
                    record.assign_sequence(Some(candidate.clone()));
                    record.set_split_sequence(split_sequence(&candidate));
                    let dependents = record.refresh_dependents();
                    store.write_fields(table, id, &dependents)?;
                    info!(
                        table = table.table,
                        record = %id,
                        sequence = %candidate,
                        attempts = attempt,
                        "allocated sequence"
                    );
                    return Ok(candidate);
                }
                Err(err) if err.is_collision() => {
                    savepoint.rollback()?;
                    debug!(
                        table = table.table,
                        candidate = %candidate,
                        attempt,
                        "sequence already taken, retrying"
                    );
                }
                Err(err) => return Err(err),
            }
        }

        let scope = record.describe_scope();
        warn!(
            table = table.table,
            scope = %scope,
            attempts = self.max_attempts,
            "sequence allocation exhausted"
        );
        Err(SequenceError::AllocationExhausted {
            table: table.table,
            scope,
            attempts: self.max_attempts,
        })
    }
}

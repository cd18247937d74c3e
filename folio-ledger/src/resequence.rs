//! Renumbering of a batch of posted entries from a new first name.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use folio_core::{FiscalYearEnd, RecordId};
use folio_sequence::SequenceFormat;
use serde::{Deserialize, Serialize};

use crate::{JournalEntry, LedgerError, LedgerResult};

/// New name planned for one entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Renumbering {
    pub id: RecordId,
    pub old_name: Option<String>,
    pub new_name: String,
}

/// Plan new names for `entries`, taking the shape of `first_name`.
///
/// Entries are ordered by date then id and grouped by the period the shape
/// restarts on. The earliest period continues from the counter of
/// `first_name`; every later period starts again at 1.
pub fn plan_resequence(
    entries: &[JournalEntry],
    first_name: &str,
    fiscal: FiscalYearEnd,
) -> LedgerResult<Vec<Renumbering>> {
    let template = SequenceFormat::parse(first_name)?;
    let reset = template.reset();

    let mut ordered: Vec<&JournalEntry> = entries.iter().collect();
    ordered.sort_by_key(|entry| (entry.date, entry.id));

    let mut periods: BTreeMap<Option<NaiveDate>, Vec<&JournalEntry>> = BTreeMap::new();
    for entry in ordered {
        let key = reset
            .window(entry.date, Some(fiscal))
            .map(|window| window.start);
        periods.entry(key).or_default().push(entry);
    }

    let first_seq = template.values().seq;
    let mut plan = Vec::with_capacity(entries.len());
    for (index, members) in periods.values().enumerate() {
        let Some(head) = members.first() else {
            continue;
        };
        let mut format = template.clone();
        format.restart(Some(head.date), Some(fiscal))?;
        let start = if index == 0 { first_seq } else { 1 };
        for (offset, entry) in (0_u64..).zip(members) {
            plan.push(Renumbering {
                id: entry.id,
                old_name: entry.name.clone(),
                new_name: format.with_seq(start + offset).render(),
            });
        }
    }
    if plan.is_empty() {
        return Err(LedgerError::InvalidState(
            "nothing to resequence".to_string(),
        ));
    }
    Ok(plan)
}

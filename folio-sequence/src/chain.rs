//! Gap detection over numbered records.

use std::collections::HashMap;

use tracing::warn;

use crate::allocator::find_last_sequence;
use crate::format::{split_sequence, SequenceFormat};
use crate::record::SequencedRecord;
use crate::store::SequenceStore;
use crate::SequenceResult;

/// Whether `record` holds the newest sequence of its prefix: the previous
/// sequence with the same prefix, incremented, renders to the record's own.
pub fn is_last_in_chain<S, R>(store: &S, record: &R) -> SequenceResult<bool>
where
    S: SequenceStore + ?Sized,
    R: SequencedRecord + ?Sized,
{
    let Some(sequence) = record.sequence().filter(|sequence| !sequence.is_empty()) else {
        return Ok(true);
    };
    let prefix = split_sequence(sequence).prefix;
    let Some(previous) = find_last_sequence(store, record, false, Some(&prefix), false)? else {
        return Ok(true);
    };
    let format = SequenceFormat::parse(&previous)?;
    let next = format.with_seq(format.values().seq + 1).render();
    Ok(next == sequence)
}

/// Whether removing `records` leaves no hole: per format, their counters are
/// contiguous and the greatest of them ends its chain.
pub fn is_end_of_chain<S, R>(store: &S, records: &[R]) -> SequenceResult<bool>
where
    S: SequenceStore + ?Sized,
    R: SequencedRecord,
{
    let mut batches: HashMap<SequenceFormat, (Vec<u64>, &R)> = HashMap::new();
    for record in records {
        let Some(sequence) = record.sequence().filter(|sequence| !sequence.is_empty()) else {
            continue;
        };
        let format = SequenceFormat::parse(sequence)?;
        let seq = format.values().seq;
        let (numbers, last) = batches
            .entry(format.with_seq(0))
            .or_insert_with(|| (Vec::new(), record));
        numbers.push(seq);
        let last_seq = last
            .sequence()
            .map(|value| split_sequence(value).number)
            .unwrap_or_default();
        if last_seq <= split_sequence(sequence).number {
            *last = record;
        }
    }

    for (format, (mut numbers, last)) in batches {
        numbers.sort_unstable();
        numbers.dedup();
        let (Some(min), Some(max)) = (numbers.first(), numbers.last()) else {
            continue;
        };
        let contiguous = (max - min) as usize + 1 == numbers.len();
        if !contiguous || !is_last_in_chain(store, last)? {
            warn!(
                table = last.table().table,
                format = %format.template(),
                "records are not at the end of their sequence chain"
            );
            return Ok(false);
        }
    }
    Ok(true)
}

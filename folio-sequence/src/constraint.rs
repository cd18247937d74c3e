use chrono::NaiveDate;

use crate::format::SequenceFormat;
use crate::record::SequencedRecord;
use crate::{SequenceError, SequenceResult};

/// Reject records whose sequence names a period other than their date's.
///
/// Records dated on or before `since` are not checked.
pub fn check_sequence_date<R>(record: &R, since: NaiveDate) -> SequenceResult<()>
where
    R: SequencedRecord + ?Sized,
{
    let (Some(sequence), Some(date)) = (record.sequence(), record.sequence_date()) else {
        return Ok(());
    };
    if sequence.is_empty() || date <= since {
        return Ok(());
    }
    let format = SequenceFormat::parse(sequence)?;
    if format.matches_date(date, record.fiscal_year_end()) {
        return Ok(());
    }
    Err(SequenceError::DateMismatch {
        table: record.table().table,
        record: record
            .id()
            .map_or_else(|| "(new)".to_string(), |id| id.to_string()),
        date,
        sequence: sequence.to_string(),
    })
}

use chrono::NaiveDate;
use thiserror::Error;

/// Result alias for sequence operations.
pub type SequenceResult<T> = Result<T, SequenceError>;

/// Error type surfaced by the sequence allocator.
#[derive(Debug, Error)]
pub enum SequenceError {
    #[error("sequence {sequence:?} cannot be formatted: {reason}")]
    FormatMismatch { sequence: String, reason: String },
    #[error(
        "the date {date} of {table} record {record} does not match its sequence {sequence:?}; \
         clear the sequence before changing the date"
    )]
    DateMismatch {
        table: &'static str,
        record: String,
        date: NaiveDate,
        sequence: String,
    },
    /// Raised by stores when a write hits the scoped uniqueness constraint.
    #[error("sequence {value:?} is already used in its scope")]
    Collision { value: String },
    #[error("no free sequence found in {table} for scope {scope} after {attempts} attempts")]
    AllocationExhausted {
        table: &'static str,
        scope: String,
        attempts: u32,
    },
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
    #[error("invalid sequence state: {0}")]
    InvalidState(String),
}

impl SequenceError {
    pub(crate) fn mismatch(sequence: &str, reason: impl Into<String>) -> Self {
        Self::FormatMismatch {
            sequence: sequence.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether the error is a recoverable uniqueness collision.
    pub fn is_collision(&self) -> bool {
        matches!(self, Self::Collision { .. })
    }
}

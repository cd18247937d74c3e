//! Core identifiers and period arithmetic shared by the Folio crates.

mod ids;
mod period;

pub use ids::{CompanyId, JournalId, RecordId};
pub use period::{
    fiscal_year_range, month_range, truncate_year, FiscalYearEnd, PeriodError, PeriodRange,
};

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while building period settings.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PeriodError {
    #[error("invalid fiscal year end month {0}")]
    InvalidMonth(u32),
    #[error("invalid fiscal year end day {day} for month {month}")]
    InvalidDay { month: u32, day: u32 },
}

/// Last day of a company's fiscal year, e.g. March 31st.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct FiscalYearEnd {
    pub month: u32,
    pub day: u32,
}

impl FiscalYearEnd {
    /// Fiscal year matching the calendar year.
    pub const CALENDAR: Self = Self { month: 12, day: 31 };

    /// Validates the month/day pair. February 29th is accepted and clamps to
    /// the 28th on non-leap years.
    pub fn new(month: u32, day: u32) -> Result<Self, PeriodError> {
        if !(1..=12).contains(&month) {
            return Err(PeriodError::InvalidMonth(month));
        }
        let longest = last_day_of_month(2000, month).day();
        if day == 0 || day > longest {
            return Err(PeriodError::InvalidDay { month, day });
        }
        Ok(Self { month, day })
    }

    pub fn is_calendar(&self) -> bool {
        *self == Self::CALENDAR
    }

    /// Closing date of the fiscal year that ends during `year`.
    pub fn closing_date(&self, year: i32) -> NaiveDate {
        let last = last_day_of_month(year, self.month);
        if self.day >= last.day() {
            last
        } else {
            last.with_day(self.day).unwrap_or(last)
        }
    }
}

impl Default for FiscalYearEnd {
    fn default() -> Self {
        Self::CALENDAR
    }
}

/// Inclusive date window.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct PeriodRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl PeriodRange {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// Start and end years, forcing a two-year span for calendar fiscal years.
    pub fn year_span(&self) -> (i32, i32) {
        let start = self.start.year();
        let end = self.end.year();
        if start == end {
            (start, start + 1)
        } else {
            (start, end)
        }
    }
}

/// Calendar month containing `date`.
pub fn month_range(date: NaiveDate) -> PeriodRange {
    let end = last_day_of_month(date.year(), date.month());
    PeriodRange {
        start: end.with_day(1).unwrap_or(date),
        end,
    }
}

/// Fiscal year containing `date`.
pub fn fiscal_year_range(date: NaiveDate, fiscal: FiscalYearEnd) -> PeriodRange {
    let closing = fiscal.closing_date(date.year());
    let (previous_closing, end) = if date <= closing {
        (fiscal.closing_date(date.year() - 1), closing)
    } else {
        (closing, fiscal.closing_date(date.year() + 1))
    };
    PeriodRange {
        start: previous_closing.succ_opt().unwrap_or(previous_closing),
        end,
    }
}

/// Keeps the last `length` digits of `year` (`2024` with length 2 is `24`).
pub fn truncate_year(year: i32, length: usize) -> u32 {
    let modulus = 10_i64.pow(length.min(9) as u32);
    i64::from(year).rem_euclid(modulus) as u32
}

fn last_day_of_month(year: i32, month: u32) -> NaiveDate {
    let (next_year, next_month) = if month >= 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|first| first.pred_opt())
        .unwrap_or(NaiveDate::MAX)
}

//! Decomposition of sequence strings into a template and the values that fill it.
//!
//! Four numbering shapes are recognized, tried in order:
//!
//! | reset        | shape                                                        |
//! |--------------|--------------------------------------------------------------|
//! | `year_range` | `prefix1 fyear_start prefix2 fyear_end prefix3 seq suffix`   |
//! | `month`      | `prefix1 year prefix2 month prefix3 seq suffix`              |
//! | `year`       | `prefix1 year prefix2 seq suffix`                            |
//! | `never`      | `prefix1 seq suffix`                                         |
//!
//! A year either starts the string or follows a non-digit, and a two-digit
//! year is always followed by a non-digit.

use std::fmt::{self, Write as _};
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use folio_core::{fiscal_year_range, month_range, truncate_year, FiscalYearEnd, PeriodRange};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::{SequenceError, SequenceResult};

/// Counter width used when the parsed string carries no trailing digits.
pub const DEFAULT_SEQ_WIDTH: usize = 4;

static YEAR_RANGE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    compile(concat!(
        r"^(?P<prefix1>(?:.*?\D)??)",
        r"(?P<year>(?:19|20|21)\d{2}|\d{2})(?P<prefix2>\D+?)",
        r"(?P<year_end>(?:19|20|21)\d{2}|\d{2})(?P<prefix3>\D+?)",
        r"(?P<seq>\d*)(?P<suffix>\D*?)$",
    ))
});

static MONTHLY_PATTERN: Lazy<Regex> = Lazy::new(|| {
    compile(concat!(
        r"^(?P<prefix1>(?:.*?\D)??)",
        r"(?:(?P<year>(?:19|20|21)\d{2})(?P<prefix2>\D*?)",
        r"|(?P<year_short>\d{2})(?P<prefix2_short>\D+?))",
        r"(?P<month>0[1-9]|1[0-2])(?P<prefix3>\D+?)",
        r"(?P<seq>\d*)(?P<suffix>\D*?)$",
    ))
});

static YEARLY_PATTERN: Lazy<Regex> = Lazy::new(|| {
    compile(concat!(
        r"^(?P<prefix1>(?:.*?\D)??)",
        r"(?P<year>(?:19|20|21)?\d{2})(?P<prefix2>\D+?)",
        r"(?P<seq>\d*)(?P<suffix>\D*?)$",
    ))
});

static FIXED_PATTERN: Lazy<Regex> =
    Lazy::new(|| compile(r"^(?P<prefix1>.*?)(?P<seq>\d{0,9})(?P<suffix>\D*?)$"));

static SPLIT_PATTERN: Lazy<Regex> = Lazy::new(|| compile(r"^(?:.*?)(\d{0,9})(?:\D*?)$"));

/// Prefix (text before the counter) shaped like monthly numbering.
pub(crate) const MONTHLY_PREFIX_PATTERN: &str =
    r"^(?:.*?\D)??(?:(?:19|20|21)\d{2}\D*?|\d{2}\D+?)(?:0[1-9]|1[0-2])\D+?$";

/// Prefix (text before the counter) shaped like yearly numbering.
pub(crate) const YEARLY_PREFIX_PATTERN: &str = r"^(?:.*?\D)??(?:19|20|21)?\d{2}\D+?$";

#[allow(clippy::expect_used)]
fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("constant sequence pattern is valid")
}

/// How often the counter restarts, deduced from the shape of a sequence.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum SequenceReset {
    YearRange,
    Month,
    Year,
    Never,
}

impl SequenceReset {
    const DEDUCTION_ORDER: [SequenceReset; 4] = [
        SequenceReset::YearRange,
        SequenceReset::Month,
        SequenceReset::Year,
        SequenceReset::Never,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SequenceReset::YearRange => "year_range",
            SequenceReset::Month => "month",
            SequenceReset::Year => "year",
            SequenceReset::Never => "never",
        }
    }

    /// Whether the shape carries period placeholders.
    pub fn has_period(self) -> bool {
        self != SequenceReset::Never
    }

    /// Date window sharing one counter with `date`.
    pub fn window(self, date: NaiveDate, fiscal: Option<FiscalYearEnd>) -> Option<PeriodRange> {
        match self {
            SequenceReset::Month => Some(month_range(date)),
            SequenceReset::Year | SequenceReset::YearRange => {
                Some(fiscal_year_range(date, fiscal.unwrap_or_default()))
            }
            SequenceReset::Never => None,
        }
    }

    /// Prefix shape excluded from strict lookups so foreign numbering in the
    /// same scope is not mistaken for the current period's counter.
    pub(crate) fn excluded_prefix_pattern(self) -> Option<&'static str> {
        match self {
            SequenceReset::Year | SequenceReset::YearRange => Some(MONTHLY_PREFIX_PATTERN),
            SequenceReset::Never => Some(YEARLY_PREFIX_PATTERN),
            SequenceReset::Month => None,
        }
    }

    fn pattern(self) -> &'static Regex {
        match self {
            SequenceReset::YearRange => &YEAR_RANGE_PATTERN,
            SequenceReset::Month => &MONTHLY_PATTERN,
            SequenceReset::Year => &YEARLY_PATTERN,
            SequenceReset::Never => &FIXED_PATTERN,
        }
    }
}

impl fmt::Display for SequenceReset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named slot of a sequence template.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Placeholder {
    Prefix1,
    Year,
    FiscalYearStart,
    Prefix2,
    Month,
    FiscalYearEnd,
    Prefix3,
    Seq,
    Suffix,
}

impl Placeholder {
    pub fn name(self) -> &'static str {
        match self {
            Placeholder::Prefix1 => "prefix1",
            Placeholder::Year => "year",
            Placeholder::FiscalYearStart => "fyear_start",
            Placeholder::Prefix2 => "prefix2",
            Placeholder::Month => "month",
            Placeholder::FiscalYearEnd => "fyear_end",
            Placeholder::Prefix3 => "prefix3",
            Placeholder::Seq => "seq",
            Placeholder::Suffix => "suffix",
        }
    }
}

/// Values filling a [`SequenceTemplate`].
#[derive(Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct FormatValues {
    pub prefix1: String,
    pub prefix2: String,
    pub prefix3: String,
    pub suffix: String,
    /// Calendar year, or fiscal year start for year ranges.
    pub year: u32,
    pub year_length: usize,
    pub year_end: u32,
    pub year_end_length: usize,
    pub month: u32,
    pub seq: u64,
    pub seq_length: usize,
}

/// Ordered placeholders of one numbering shape.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct SequenceTemplate {
    reset: SequenceReset,
}

impl SequenceTemplate {
    pub fn new(reset: SequenceReset) -> Self {
        Self { reset }
    }

    pub fn reset(&self) -> SequenceReset {
        self.reset
    }

    pub fn placeholders(&self) -> &'static [Placeholder] {
        use Placeholder::*;
        match self.reset {
            SequenceReset::YearRange => &[
                Prefix1,
                FiscalYearStart,
                Prefix2,
                FiscalYearEnd,
                Prefix3,
                Seq,
                Suffix,
            ],
            SequenceReset::Month => &[Prefix1, Year, Prefix2, Month, Prefix3, Seq, Suffix],
            SequenceReset::Year => &[Prefix1, Year, Prefix2, Seq, Suffix],
            SequenceReset::Never => &[Prefix1, Seq, Suffix],
        }
    }

    pub fn render(&self, values: &FormatValues) -> String {
        self.render_until(values, None)
    }

    fn render_until(&self, values: &FormatValues, stop: Option<Placeholder>) -> String {
        let mut out = String::with_capacity(32);
        for placeholder in self.placeholders() {
            if Some(*placeholder) == stop {
                break;
            }
            // Writing into a String cannot fail.
            let _ = match placeholder {
                Placeholder::Prefix1 => out.write_str(&values.prefix1),
                Placeholder::Prefix2 => out.write_str(&values.prefix2),
                Placeholder::Prefix3 => out.write_str(&values.prefix3),
                Placeholder::Suffix => out.write_str(&values.suffix),
                Placeholder::Year | Placeholder::FiscalYearStart => {
                    write!(out, "{:0width$}", values.year, width = values.year_length)
                }
                Placeholder::FiscalYearEnd => write!(
                    out,
                    "{:0width$}",
                    values.year_end,
                    width = values.year_end_length
                ),
                Placeholder::Month => write!(out, "{:02}", values.month),
                Placeholder::Seq => {
                    write!(out, "{:0width$}", values.seq, width = values.seq_length)
                }
            };
        }
        out
    }
}

impl fmt::Display for SequenceTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for placeholder in self.placeholders() {
            write!(f, "{{{}}}", placeholder.name())?;
        }
        Ok(())
    }
}

/// A decomposed sequence: its template plus the values reproducing it.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct SequenceFormat {
    template: SequenceTemplate,
    values: FormatValues,
}

impl SequenceFormat {
    /// Decompose `sequence`, recognizing period placeholders.
    pub fn parse(sequence: &str) -> SequenceResult<Self> {
        for reset in SequenceReset::DEDUCTION_ORDER {
            if let Some(format) = Self::parse_shape(sequence, reset)? {
                return Ok(format);
            }
        }
        Err(SequenceError::mismatch(
            sequence,
            "no numbering shape matches",
        ))
    }

    /// Decompose `sequence` into a literal prefix and a counter only.
    pub fn parse_fixed(sequence: &str) -> SequenceResult<Self> {
        Self::parse_shape(sequence, SequenceReset::Never)?
            .ok_or_else(|| SequenceError::mismatch(sequence, "no trailing counter can be isolated"))
    }

    /// Decompose `sequence` for a record dated `date`; undated records only
    /// get a prefix and a counter.
    pub fn parse_for(sequence: &str, date: Option<NaiveDate>) -> SequenceResult<Self> {
        match date {
            Some(_) => Self::parse(sequence),
            None => Self::parse_fixed(sequence),
        }
    }

    fn parse_shape(sequence: &str, reset: SequenceReset) -> SequenceResult<Option<Self>> {
        let Some(caps) = reset.pattern().captures(sequence) else {
            return Ok(None);
        };
        let mut values = FormatValues {
            prefix1: group(&caps, "prefix1").to_string(),
            suffix: group(&caps, "suffix").to_string(),
            ..FormatValues::default()
        };
        match reset {
            SequenceReset::YearRange => {
                let start = group(&caps, "year");
                let end = group(&caps, "year_end");
                let year: u32 = number(sequence, start)?;
                let year_end: u32 = number(sequence, end)?;
                let consecutive = truncate_year(year as i32 + 1, end.len()) == year_end;
                if start.len() < end.len() || !consecutive {
                    return Ok(None);
                }
                values.year = year;
                values.year_length = start.len();
                values.year_end = year_end;
                values.year_end_length = end.len();
                values.prefix2 = group(&caps, "prefix2").to_string();
                values.prefix3 = group(&caps, "prefix3").to_string();
            }
            SequenceReset::Month => {
                let (year, prefix2) = match caps.name("year") {
                    Some(year) => (year.as_str(), group(&caps, "prefix2")),
                    None => (group(&caps, "year_short"), group(&caps, "prefix2_short")),
                };
                values.year = number(sequence, year)?;
                values.year_length = year.len();
                values.prefix2 = prefix2.to_string();
                values.month = number(sequence, group(&caps, "month"))?;
                values.prefix3 = group(&caps, "prefix3").to_string();
            }
            SequenceReset::Year => {
                let year = group(&caps, "year");
                values.year = number(sequence, year)?;
                values.year_length = year.len();
                values.prefix2 = group(&caps, "prefix2").to_string();
            }
            SequenceReset::Never => {}
        }

        let seq = group(&caps, "seq");
        if seq.is_empty() {
            // Without a counter, trailing text belongs to the prefix.
            let suffix = std::mem::take(&mut values.suffix);
            match reset {
                SequenceReset::Never => values.prefix1.push_str(&suffix),
                SequenceReset::Year => values.prefix2.push_str(&suffix),
                SequenceReset::Month | SequenceReset::YearRange => {
                    values.prefix3.push_str(&suffix)
                }
            }
            values.seq = 0;
            values.seq_length = DEFAULT_SEQ_WIDTH;
        } else {
            values.seq = number(sequence, seq)?;
            values.seq_length = seq.len();
        }

        Ok(Some(Self {
            template: SequenceTemplate::new(reset),
            values,
        }))
    }

    pub fn from_parts(template: SequenceTemplate, values: FormatValues) -> Self {
        Self { template, values }
    }

    pub fn into_parts(self) -> (SequenceTemplate, FormatValues) {
        (self.template, self.values)
    }

    pub fn template(&self) -> SequenceTemplate {
        self.template
    }

    pub fn reset(&self) -> SequenceReset {
        self.template.reset
    }

    pub fn values(&self) -> &FormatValues {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut FormatValues {
        &mut self.values
    }

    pub fn render(&self) -> String {
        self.template.render(&self.values)
    }

    /// Everything rendered before the counter: literal prefix plus period part.
    pub fn prefix_part(&self) -> String {
        self.template.render_until(&self.values, Some(Placeholder::Seq))
    }

    /// Same format with the counter replaced, used to group sequences of one chain.
    pub fn with_seq(&self, seq: u64) -> Self {
        let mut format = self.clone();
        format.values.seq = seq;
        format
    }

    /// Start a new period: counter back to zero, period values taken from `date`.
    pub fn restart(
        &mut self,
        date: Option<NaiveDate>,
        fiscal: Option<FiscalYearEnd>,
    ) -> SequenceResult<()> {
        self.values.seq = 0;
        let reset = self.reset();
        if !reset.has_period() {
            return Ok(());
        }
        let Some(date) = date else {
            return Err(SequenceError::mismatch(
                &self.template.to_string(),
                format!("{reset} numbering needs a record date"),
            ));
        };
        match reset {
            SequenceReset::Month => {
                self.values.year = truncate_year(date.year(), self.values.year_length);
                self.values.month = date.month();
            }
            SequenceReset::Year => {
                let range = fiscal_year_range(date, fiscal.unwrap_or_default());
                self.values.year = truncate_year(range.start.year(), self.values.year_length);
            }
            SequenceReset::YearRange => {
                let fiscal = fiscal.ok_or_else(|| {
                    SequenceError::mismatch(
                        &self.template.to_string(),
                        "fiscal year placeholders need a fiscal year configuration",
                    )
                })?;
                let (start, end) = fiscal_year_range(date, fiscal).year_span();
                self.values.year = truncate_year(start, self.values.year_length);
                self.values.year_end = truncate_year(end, self.values.year_end_length);
            }
            SequenceReset::Never => {}
        }
        Ok(())
    }

    /// Whether the period part agrees with `date`.
    pub fn matches_date(&self, date: NaiveDate, fiscal: Option<FiscalYearEnd>) -> bool {
        let values = &self.values;
        match self.reset() {
            SequenceReset::Never => true,
            SequenceReset::Month => {
                values.year == truncate_year(date.year(), values.year_length)
                    && values.month == date.month()
            }
            SequenceReset::Year => {
                // Either end of a straddling fiscal year may name it.
                let range = fiscal_year_range(date, fiscal.unwrap_or_default());
                [range.start.year(), range.end.year()]
                    .into_iter()
                    .any(|year| values.year == truncate_year(year, values.year_length))
            }
            SequenceReset::YearRange => {
                let (start, end) =
                    fiscal_year_range(date, fiscal.unwrap_or_default()).year_span();
                values.year == truncate_year(start, values.year_length)
                    && values.year_end == truncate_year(end, values.year_end_length)
            }
        }
    }
}

/// Deduce how often the counter of `sequence` restarts.
pub fn deduce_reset(sequence: &str) -> SequenceResult<SequenceReset> {
    SequenceFormat::parse(sequence).map(|format| format.reset())
}

/// Stored decomposition of a sequence used for indexing and probing.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SplitSequence {
    pub prefix: String,
    pub number: i64,
}

/// Split `sequence` into the text before its counter and the counter value.
///
/// The split follows [`SequenceFormat::prefix_part`], so the stored prefix
/// keeps the period part whatever the counter width.
pub fn split_sequence(sequence: &str) -> SplitSequence {
    if let Ok(format) = SequenceFormat::parse(sequence) {
        if let Ok(number) = i64::try_from(format.values().seq) {
            return SplitSequence {
                prefix: format.prefix_part(),
                number,
            };
        }
    }
    match SPLIT_PATTERN.captures(sequence).and_then(|caps| caps.get(1)) {
        Some(counter) => SplitSequence {
            prefix: sequence[..counter.start()].to_string(),
            number: counter.as_str().parse().unwrap_or(0),
        },
        None => SplitSequence {
            prefix: sequence.to_string(),
            number: 0,
        },
    }
}

fn group<'h>(caps: &Captures<'h>, name: &str) -> &'h str {
    caps.name(name).map_or("", |m| m.as_str())
}

fn number<T: FromStr>(sequence: &str, digits: &str) -> SequenceResult<T> {
    if digits.is_empty() {
        return T::from_str("0")
            .map_err(|_| SequenceError::mismatch(sequence, "empty numeric part"));
    }
    digits
        .parse()
        .map_err(|_| SequenceError::mismatch(sequence, format!("{digits} is out of range")))
}

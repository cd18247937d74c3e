use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use folio_core::{CompanyId, FiscalYearEnd, JournalId};
use serde::{Deserialize, Serialize};

use crate::EntryKind;

/// Legal entity owning journals; its fiscal year drives yearly numbering.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Company {
    pub id: CompanyId,
    pub name: String,
    pub fiscal_year_end: FiscalYearEnd,
}

/// Book of entries sharing one numbering scope.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Journal {
    pub id: JournalId,
    pub company_id: CompanyId,
    pub code: String,
    pub name: String,
    pub kind: JournalKind,
    /// Number refunds in their own `R`-prefixed series.
    pub refund_sequence: bool,
}

impl Journal {
    /// Template used for the first entry of a period.
    ///
    /// Sales and treasury journals number yearly (`INV/2024/00000`); the
    /// others number monthly (`BILL/2024/03/0000`).
    pub fn starting_sequence(&self, date: NaiveDate, kind: EntryKind) -> String {
        let base = if self.kind.numbers_yearly() {
            format!("{}/{:04}/00000", self.code, date.year())
        } else {
            format!("{}/{:04}/{:02}/0000", self.code, date.year(), date.month())
        };
        if self.refund_sequence && kind.is_refund() {
            format!("R{base}")
        } else {
            base
        }
    }
}

/// Purpose of a journal.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalKind {
    Sale,
    Purchase,
    Bank,
    Cash,
    Credit,
    General,
}

impl JournalKind {
    pub fn as_str(self) -> &'static str {
        match self {
            JournalKind::Sale => "sale",
            JournalKind::Purchase => "purchase",
            JournalKind::Bank => "bank",
            JournalKind::Cash => "cash",
            JournalKind::Credit => "credit",
            JournalKind::General => "general",
        }
    }

    pub fn numbers_yearly(self) -> bool {
        matches!(
            self,
            JournalKind::Sale | JournalKind::Bank | JournalKind::Cash | JournalKind::Credit
        )
    }
}

impl fmt::Display for JournalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JournalKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "sale" => Ok(JournalKind::Sale),
            "purchase" => Ok(JournalKind::Purchase),
            "bank" => Ok(JournalKind::Bank),
            "cash" => Ok(JournalKind::Cash),
            "credit" => Ok(JournalKind::Credit),
            "general" => Ok(JournalKind::General),
            other => Err(format!("unknown journal kind '{other}'")),
        }
    }
}

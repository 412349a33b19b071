//! Structured date representation with varying precision and BCE support.

use serde::{Deserialize, Serialize};

/// Granularity at which a date expression is known.
///
/// Ordered from finest to coarsest; `Unknown` dates are retained for audit
/// but excluded from chronological placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatePrecision {
    Day,
    Month,
    Year,
    Decade,
    Century,
    Millennium,
    Era,
    Unknown,
}

impl DatePrecision {
    /// Rank for "most precise wins" reconciliation. Lower is finer.
    pub fn rank(self) -> u8 {
        match self {
            DatePrecision::Day => 0,
            DatePrecision::Month => 1,
            DatePrecision::Year => 2,
            DatePrecision::Decade => 3,
            DatePrecision::Century => 4,
            DatePrecision::Millennium => 5,
            DatePrecision::Era => 6,
            DatePrecision::Unknown => 7,
        }
    }

    /// Whether events at this precision participate in chronological sorting.
    pub fn is_placeable(self) -> bool {
        !matches!(self, DatePrecision::Unknown)
    }
}

/// Structured interval parsed from a free-text date expression.
///
/// Years are signed and BCE years are stored negative, so chronological
/// comparison across the BCE/CE boundary is plain numeric comparison.
/// Invariant: if `precision != Unknown`, at least one of `start_year` /
/// `end_year` is present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedDateInfo {
    /// The original, verbatim date text that was parsed.
    pub original_text: String,

    /// A clean, human-readable version of the date.
    pub display_text: String,

    /// Granularity of the date.
    pub precision: DatePrecision,

    /// Start year; negative for BCE.
    pub start_year: Option<i32>,
    pub start_month: Option<u32>,
    pub start_day: Option<u32>,

    /// End year; negative for BCE.
    pub end_year: Option<i32>,
    pub end_month: Option<u32>,
    pub end_day: Option<u32>,

    /// True if the date lies in the BCE era.
    pub is_bce: bool,
}

impl ParsedDateInfo {
    /// An unparseable expression: retained verbatim, excluded from placement.
    pub fn unknown(original_text: impl Into<String>) -> Self {
        let original_text = original_text.into();
        Self {
            display_text: original_text.clone(),
            original_text,
            precision: DatePrecision::Unknown,
            start_year: None,
            start_month: None,
            start_day: None,
            end_year: None,
            end_month: None,
            end_day: None,
            is_bce: false,
        }
    }

    /// Chronological sort key: `(year, month, day)` with BCE years negative.
    ///
    /// Returns `None` for `Unknown` precision or when no start/end year is
    /// known, which excludes the event from timeline placement.
    pub fn sort_key(&self) -> Option<(i32, u32, u32)> {
        if !self.precision.is_placeable() {
            return None;
        }
        let year = self.start_year.or(self.end_year)?;
        Some((
            year,
            self.start_month.unwrap_or(1),
            self.start_day.unwrap_or(1),
        ))
    }

    /// Year used for candidate pre-filtering in the merger.
    pub fn event_year(&self) -> Option<i32> {
        self.start_year.or(self.end_year)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precision_rank_is_finest_first() {
        assert!(DatePrecision::Day.rank() < DatePrecision::Month.rank());
        assert!(DatePrecision::Year.rank() < DatePrecision::Century.rank());
        assert!(DatePrecision::Era.rank() < DatePrecision::Unknown.rank());
    }

    #[test]
    fn unknown_has_no_sort_key() {
        let info = ParsedDateInfo::unknown("sometime long ago");
        assert_eq!(info.sort_key(), None);
        assert!(!info.precision.is_placeable());
    }

    #[test]
    fn bce_sorts_before_ce_numerically() {
        let mut bce = ParsedDateInfo::unknown("100 BCE");
        bce.precision = DatePrecision::Year;
        bce.start_year = Some(-100);
        bce.is_bce = true;

        let mut ce = ParsedDateInfo::unknown("1 CE");
        ce.precision = DatePrecision::Year;
        ce.start_year = Some(1);

        assert!(bce.sort_key() < ce.sort_key());
    }
}

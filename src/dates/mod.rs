//! Date Normalizer: free-text date phrase → structured interval.
//!
//! Input is an LLM-pre-extracted date expression (not raw document text),
//! e.g. "March 2021", "the 1990s", "19th century BC". The normalizer
//! determines precision, era sign, and a start/end interval.
//!
//! BCE years are stored as negative integers so that chronological
//! comparison across the BCE/CE boundary is a plain numeric comparison.
//! Unparseable phrases map to `Unknown` precision and are kept for audit
//! but excluded from timeline placement.
//!
//! End-of-period expansion, applied when only a start is known:
//!
//! | precision  | end computed as                     |
//! |------------|-------------------------------------|
//! | year       | Dec 31 of start year                |
//! | month      | last calendar day of start month    |
//! | decade     | start_year + 9, Dec 31              |
//! | century    | start_year + 99, Dec 31             |
//! | millennium | start_year + 999, Dec 31            |
//! | day / era  | no expansion; end = start when both day fields are present |

use std::sync::OnceLock;

use regex::Regex;

use crate::types::date::{DatePrecision, ParsedDateInfo};

const MONTH_NAMES: [&str; 12] = [
    "january",
    "february",
    "march",
    "april",
    "may",
    "june",
    "july",
    "august",
    "september",
    "october",
    "november",
    "december",
];

const ORDINAL_WORDS: [&str; 20] = [
    "first",
    "second",
    "third",
    "fourth",
    "fifth",
    "sixth",
    "seventh",
    "eighth",
    "ninth",
    "tenth",
    "eleventh",
    "twelfth",
    "thirteenth",
    "fourteenth",
    "fifteenth",
    "sixteenth",
    "seventeenth",
    "eighteenth",
    "nineteenth",
    "twentieth",
];

/// Normalize a free-text date phrase into a structured interval.
pub fn normalize(free_text: &str) -> ParsedDateInfo {
    let trimmed = free_text.trim();
    if trimmed.is_empty() {
        return ParsedDateInfo::unknown(free_text);
    }

    let (body, approximate) = strip_prefixes(trimmed);
    let (body, era) = strip_era_suffix(&body);

    let parsed = parse_iso_day(&body, era)
        .or_else(|| parse_iso_month(&body, era))
        .or_else(|| parse_month_name_day(&body, era))
        .or_else(|| parse_month_name_year(&body, era))
        .or_else(|| parse_decade(&body, era))
        .or_else(|| parse_century(&body, era))
        .or_else(|| parse_millennium(&body, era))
        .or_else(|| parse_year_range(&body, era))
        .or_else(|| parse_bare_year(&body, era));

    match parsed {
        Some(mut info) => {
            info.original_text = free_text.to_string();
            if approximate {
                // Circa dates keep their year anchor but degrade to era
                // precision: no month/day claims, no period expansion.
                info.precision = DatePrecision::Era;
                info.start_month = None;
                info.start_day = None;
                info.end_month = None;
                info.end_day = None;
                info.display_text = format!("c. {}", info.display_text);
            }
            expand_end(&mut info);
            info
        }
        None => ParsedDateInfo::unknown(free_text),
    }
}

/// Era marker parsed from a suffix like "BC" or "AD".
#[derive(Debug, Clone, Copy, PartialEq)]
enum Era {
    Bce,
    Ce,
    Unmarked,
}

impl Era {
    fn is_bce(self) -> bool {
        matches!(self, Era::Bce)
    }

    /// Apply the era sign to a positive year literal.
    fn signed(self, year: i32) -> i32 {
        if self.is_bce() {
            -year
        } else {
            year
        }
    }
}

fn strip_prefixes(text: &str) -> (String, bool) {
    static PREFIX: OnceLock<Regex> = OnceLock::new();
    static CIRCA: OnceLock<Regex> = OnceLock::new();
    let prefix =
        PREFIX.get_or_init(|| Regex::new(r"(?i)^(?:the|in|on|during)\s+").unwrap());
    let circa = CIRCA.get_or_init(|| {
        Regex::new(r"(?i)^(?:circa|c\.|ca\.|around|about|approximately)\s+").unwrap()
    });

    let mut body = text.to_string();
    let mut approximate = false;
    loop {
        if let Some(m) = circa.find(&body) {
            approximate = true;
            body = body[m.end()..].to_string();
            continue;
        }
        if let Some(m) = prefix.find(&body) {
            body = body[m.end()..].to_string();
            continue;
        }
        break;
    }
    (body.trim().to_string(), approximate)
}

fn strip_era_suffix(text: &str) -> (String, Era) {
    static BCE: OnceLock<Regex> = OnceLock::new();
    static CE: OnceLock<Regex> = OnceLock::new();
    let bce = BCE
        .get_or_init(|| Regex::new(r"(?i)\s+(?:bce|bc|b\.c\.e\.|b\.c\.)\.?$").unwrap());
    let ce = CE.get_or_init(|| Regex::new(r"(?i)\s+(?:ce|ad|c\.e\.|a\.d\.)\.?$").unwrap());

    if let Some(m) = bce.find(text) {
        return (text[..m.start()].trim().to_string(), Era::Bce);
    }
    if let Some(m) = ce.find(text) {
        return (text[..m.start()].trim().to_string(), Era::Ce);
    }
    (text.to_string(), Era::Unmarked)
}

fn month_number(name: &str) -> Option<u32> {
    let lower = name.to_lowercase();
    MONTH_NAMES
        .iter()
        .position(|m| *m == lower)
        .map(|i| i as u32 + 1)
}

fn month_display(month: u32) -> &'static str {
    // Safe: callers only pass values obtained from month_number / 1..=12.
    [
        "January",
        "February",
        "March",
        "April",
        "May",
        "June",
        "July",
        "August",
        "September",
        "October",
        "November",
        "December",
    ][(month - 1) as usize]
}

fn era_display(era: Era) -> &'static str {
    match era {
        Era::Bce => " BCE",
        Era::Ce | Era::Unmarked => "",
    }
}

fn base_info(text: &str, display: String, precision: DatePrecision, era: Era) -> ParsedDateInfo {
    ParsedDateInfo {
        original_text: text.to_string(),
        display_text: display,
        precision,
        start_year: None,
        start_month: None,
        start_day: None,
        end_year: None,
        end_month: None,
        end_day: None,
        is_bce: era.is_bce(),
    }
}

fn parse_iso_day(body: &str, era: Era) -> Option<ParsedDateInfo> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"^(\d{1,4})-(\d{1,2})-(\d{1,2})$").unwrap());
    let caps = re.captures(body)?;
    let year: i32 = caps[1].parse().ok()?;
    let month: u32 = caps[2].parse().ok()?;
    let day: u32 = caps[3].parse().ok()?;
    if !(1..=12).contains(&month) || day < 1 || day > last_day_of_month(year, month) {
        return None;
    }
    let mut info = base_info(
        body,
        format!("{} {} {}{}", day, month_display(month), year, era_display(era)),
        DatePrecision::Day,
        era,
    );
    info.start_year = Some(era.signed(year));
    info.start_month = Some(month);
    info.start_day = Some(day);
    Some(info)
}

fn parse_iso_month(body: &str, era: Era) -> Option<ParsedDateInfo> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"^(\d{3,4})-(\d{1,2})$").unwrap());
    let caps = re.captures(body)?;
    let year: i32 = caps[1].parse().ok()?;
    let month: u32 = caps[2].parse().ok()?;
    if !(1..=12).contains(&month) {
        return None;
    }
    let mut info = base_info(
        body,
        format!("{} {}{}", month_display(month), year, era_display(era)),
        DatePrecision::Month,
        era,
    );
    info.start_year = Some(era.signed(year));
    info.start_month = Some(month);
    Some(info)
}

fn parse_month_name_day(body: &str, era: Era) -> Option<ParsedDateInfo> {
    static DMY: OnceLock<Regex> = OnceLock::new();
    static MDY: OnceLock<Regex> = OnceLock::new();
    let dmy = DMY
        .get_or_init(|| Regex::new(r"(?i)^(\d{1,2})\s+([a-z]+),?\s+(\d{1,4})$").unwrap());
    let mdy = MDY
        .get_or_init(|| Regex::new(r"(?i)^([a-z]+)\s+(\d{1,2}),?\s+(\d{1,4})$").unwrap());

    let (day, month, year) = if let Some(caps) = dmy.captures(body) {
        (
            caps[1].parse::<u32>().ok()?,
            month_number(&caps[2])?,
            caps[3].parse::<i32>().ok()?,
        )
    } else if let Some(caps) = mdy.captures(body) {
        (
            caps[2].parse::<u32>().ok()?,
            month_number(&caps[1])?,
            caps[3].parse::<i32>().ok()?,
        )
    } else {
        return None;
    };

    if day < 1 || day > last_day_of_month(year, month) {
        return None;
    }
    let mut info = base_info(
        body,
        format!("{} {} {}{}", day, month_display(month), year, era_display(era)),
        DatePrecision::Day,
        era,
    );
    info.start_year = Some(era.signed(year));
    info.start_month = Some(month);
    info.start_day = Some(day);
    Some(info)
}

fn parse_month_name_year(body: &str, era: Era) -> Option<ParsedDateInfo> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"(?i)^([a-z]+),?\s+(\d{1,4})$").unwrap());
    let caps = re.captures(body)?;
    let month = month_number(&caps[1])?;
    let year: i32 = caps[2].parse().ok()?;
    let mut info = base_info(
        body,
        format!("{} {}{}", month_display(month), year, era_display(era)),
        DatePrecision::Month,
        era,
    );
    info.start_year = Some(era.signed(year));
    info.start_month = Some(month);
    Some(info)
}

fn parse_decade(body: &str, era: Era) -> Option<ParsedDateInfo> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"(?i)^(\d{1,3}0)'?s$").unwrap());
    let caps = re.captures(body)?;
    let decade: i32 = caps[1].parse().ok()?;
    let mut info = base_info(
        body,
        format!("{}s{}", decade, era_display(era)),
        DatePrecision::Decade,
        era,
    );
    // A BCE decade like the "220s BC" spans 229-220 BC; the earliest year
    // is the start so the +9 expansion lands on the decade label year.
    info.start_year = Some(if era.is_bce() {
        -(decade + 9)
    } else {
        decade
    });
    Some(info)
}

fn ordinal_value(text: &str) -> Option<i32> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"(?i)^(\d{1,2})(?:st|nd|rd|th)$").unwrap());
    if let Some(caps) = re.captures(text) {
        return caps[1].parse().ok();
    }
    let lower = text.to_lowercase();
    ORDINAL_WORDS
        .iter()
        .position(|w| *w == lower)
        .map(|i| i as i32 + 1)
}

fn parse_century(body: &str, era: Era) -> Option<ParsedDateInfo> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"(?i)^([a-z0-9]+)\s+century$").unwrap());
    let caps = re.captures(body)?;
    let n = ordinal_value(&caps[1])?;
    if n < 1 {
        return None;
    }
    let mut info = base_info(
        body,
        format!("{} century{}", ordinal_display(n), era_display(era)),
        DatePrecision::Century,
        era,
    );
    // "19th century" begins at 1800 so that the +99 expansion covers it;
    // "19th century BCE" spans -1900..-1801.
    info.start_year = Some(if era.is_bce() { -(n * 100) } else { (n - 1) * 100 });
    Some(info)
}

fn parse_millennium(body: &str, era: Era) -> Option<ParsedDateInfo> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"(?i)^([a-z0-9]+)\s+millennium$").unwrap());
    let caps = re.captures(body)?;
    let n = ordinal_value(&caps[1])?;
    if n < 1 {
        return None;
    }
    let mut info = base_info(
        body,
        format!("{} millennium{}", ordinal_display(n), era_display(era)),
        DatePrecision::Millennium,
        era,
    );
    info.start_year = Some(if era.is_bce() {
        -(n * 1000)
    } else {
        (n - 1) * 1000
    });
    Some(info)
}

fn parse_year_range(body: &str, era: Era) -> Option<ParsedDateInfo> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| {
        Regex::new(r"(?i)^(?:from\s+)?(\d{1,4})\s*(?:-|–|—|to|until)\s*(\d{3,4})$").unwrap()
    });
    let caps = re.captures(body)?;
    let start: i32 = caps[1].parse().ok()?;
    let end: i32 = caps[2].parse().ok()?;
    // BCE ranges are written largest-first ("from 300 to 250 BC").
    let (s, e) = if era.is_bce() {
        (era.signed(start), era.signed(end))
    } else {
        (start, end)
    };
    if s > e {
        return None;
    }
    let mut info = base_info(
        body,
        format!("{}–{}{}", start, end, era_display(era)),
        DatePrecision::Year,
        era,
    );
    info.start_year = Some(s);
    info.end_year = Some(e);
    Some(info)
}

fn parse_bare_year(body: &str, era: Era) -> Option<ParsedDateInfo> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"^(\d{1,4})$").unwrap());
    let caps = re.captures(body)?;
    let year: i32 = caps[1].parse().ok()?;
    if year == 0 {
        return None;
    }
    let mut info = base_info(
        body,
        format!("{}{}", year, era_display(era)),
        DatePrecision::Year,
        era,
    );
    info.start_year = Some(era.signed(year));
    Some(info)
}

fn ordinal_display(n: i32) -> String {
    let suffix = match (n % 10, n % 100) {
        (1, 11) | (2, 12) | (3, 13) => "th",
        (1, _) => "st",
        (2, _) => "nd",
        (3, _) => "rd",
        _ => "th",
    };
    format!("{}{}", n, suffix)
}

/// Last calendar day of a month, leap-year aware. Works for negative
/// (BCE) years via the proleptic rule on the absolute year.
pub fn last_day_of_month(year: i32, month: u32) -> u32 {
    match month {
        1 | 3 | 5 | 7 | 8 | 10 | 12 => 31,
        4 | 6 | 9 | 11 => 30,
        2 => {
            let y = year.abs();
            if y % 4 == 0 && (y % 100 != 0 || y % 400 == 0) {
                29
            } else {
                28
            }
        }
        _ => 30,
    }
}

/// Apply end-of-period expansion when only a start is known.
fn expand_end(info: &mut ParsedDateInfo) {
    let Some(start_year) = info.start_year else {
        return;
    };

    match info.precision {
        DatePrecision::Year => {
            let end_year = info.end_year.unwrap_or(start_year);
            info.end_year = Some(end_year);
            info.end_month = Some(12);
            info.end_day = Some(31);
        }
        DatePrecision::Month => {
            if info.end_year.is_none() {
                let end_month = info.start_month.unwrap_or(1);
                info.end_year = Some(start_year);
                info.end_month = Some(end_month);
                info.end_day = Some(last_day_of_month(start_year, end_month));
            }
        }
        DatePrecision::Decade => {
            if info.end_year.is_none() {
                info.end_year = Some(start_year + 9);
                info.end_month = Some(12);
                info.end_day = Some(31);
            }
        }
        DatePrecision::Century => {
            if info.end_year.is_none() {
                info.end_year = Some(start_year + 99);
                info.end_month = Some(12);
                info.end_day = Some(31);
            }
        }
        DatePrecision::Millennium => {
            if info.end_year.is_none() {
                info.end_year = Some(start_year + 999);
                info.end_month = Some(12);
                info.end_day = Some(31);
            }
        }
        DatePrecision::Day => {
            if info.end_year.is_none() && info.start_day.is_some() {
                info.end_year = Some(start_year);
                info.end_month = info.start_month;
                info.end_day = info.start_day;
            }
        }
        DatePrecision::Era | DatePrecision::Unknown => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_iso_day() {
        let info = normalize("2021-03-15");
        assert_eq!(info.precision, DatePrecision::Day);
        assert_eq!(info.start_year, Some(2021));
        assert_eq!(info.start_month, Some(3));
        assert_eq!(info.start_day, Some(15));
        assert_eq!(info.end_day, Some(15));
        assert!(!info.is_bce);
    }

    #[test]
    fn parses_month_name_forms() {
        for text in ["March 2021", "march 2021", "March, 2021"] {
            let info = normalize(text);
            assert_eq!(info.precision, DatePrecision::Month, "input: {}", text);
            assert_eq!(info.start_year, Some(2021));
            assert_eq!(info.start_month, Some(3));
        }

        let dmy = normalize("15 March 2021");
        let mdy = normalize("March 15, 2021");
        assert_eq!(dmy.precision, DatePrecision::Day);
        assert_eq!(dmy.start_day, Some(15));
        assert_eq!(mdy.start_day, Some(15));
        assert_eq!(mdy.start_month, Some(3));
    }

    #[test]
    fn month_expands_to_last_calendar_day() {
        let feb = normalize("February 2020");
        assert_eq!(feb.end_day, Some(29)); // leap year
        let feb2 = normalize("February 1900");
        assert_eq!(feb2.end_day, Some(28)); // century non-leap
        let april = normalize("April 1912");
        assert_eq!(april.end_day, Some(30));
    }

    #[test]
    fn year_expands_to_dec_31() {
        let info = normalize("1969");
        assert_eq!(info.precision, DatePrecision::Year);
        assert_eq!(info.start_year, Some(1969));
        assert_eq!(info.end_year, Some(1969));
        assert_eq!(info.end_month, Some(12));
        assert_eq!(info.end_day, Some(31));
    }

    #[test]
    fn parses_decade() {
        let info = normalize("the 1990s");
        assert_eq!(info.precision, DatePrecision::Decade);
        assert_eq!(info.start_year, Some(1990));
        assert_eq!(info.end_year, Some(1999));
        assert_eq!(info.end_day, Some(31));
    }

    #[test]
    fn parses_century_forms() {
        let digits = normalize("19th century");
        assert_eq!(digits.precision, DatePrecision::Century);
        assert_eq!(digits.start_year, Some(1800));
        assert_eq!(digits.end_year, Some(1899));

        let words = normalize("nineteenth century");
        assert_eq!(words.start_year, Some(1800));
    }

    #[test]
    fn parses_bce_century() {
        let info = normalize("5th century BC");
        assert_eq!(info.precision, DatePrecision::Century);
        assert!(info.is_bce);
        assert_eq!(info.start_year, Some(-500));
        assert_eq!(info.end_year, Some(-401));
    }

    #[test]
    fn parses_millennium() {
        let info = normalize("2nd millennium BCE");
        assert_eq!(info.precision, DatePrecision::Millennium);
        assert_eq!(info.start_year, Some(-2000));
        assert_eq!(info.end_year, Some(-1001));
    }

    #[test]
    fn bce_year_is_negative() {
        let info = normalize("100 BCE");
        assert!(info.is_bce);
        assert_eq!(info.start_year, Some(-100));
        assert_eq!(info.end_year, Some(-100));
        assert_eq!(info.end_month, Some(12));
    }

    #[test]
    fn bce_sorts_before_ce() {
        let bce = normalize("100 BCE");
        let ce = normalize("1 AD");
        assert!(bce.sort_key() < ce.sort_key());
    }

    #[test]
    fn parses_year_range() {
        let info = normalize("1914–1918");
        assert_eq!(info.precision, DatePrecision::Year);
        assert_eq!(info.start_year, Some(1914));
        assert_eq!(info.end_year, Some(1918));
        assert_eq!(info.end_month, Some(12));

        let worded = normalize("from 1939 to 1945");
        assert_eq!(worded.start_year, Some(1939));
        assert_eq!(worded.end_year, Some(1945));
    }

    #[test]
    fn circa_becomes_era_precision() {
        let info = normalize("circa 500 BCE");
        assert_eq!(info.precision, DatePrecision::Era);
        assert_eq!(info.start_year, Some(-500));
        assert_eq!(info.end_year, None);
        assert!(info.precision.is_placeable());
    }

    #[test]
    fn unparseable_text_is_unknown() {
        for text in ["sometime long ago", "", "   ", "the distant future"] {
            let info = normalize(text);
            assert_eq!(info.precision, DatePrecision::Unknown, "input: {:?}", text);
            assert_eq!(info.sort_key(), None);
        }
    }

    #[test]
    fn original_text_is_preserved_verbatim() {
        let info = normalize("  the 1990s ");
        assert_eq!(info.original_text, "  the 1990s ");
        assert_eq!(info.display_text, "1990s");
    }
}

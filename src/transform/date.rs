use chrono::{DateTime, NaiveDate, NaiveTime};

use crate::table::Cell;

const SEPARATORS: [char; 3] = ['.', '/', '-'];
const TIME_FORMATS: [&str; 2] = ["%H:%M:%S%.f", "%H:%M"];

/// Canonical `YYYY-MM-DD` for anything that reads as a day-first or ISO date.
///
/// `None`/blank gives `None`. Text that does not parse is returned unchanged,
/// so a bad date degrades the record instead of dropping it.
pub fn normalize_date(raw: Option<&str>) -> Option<String> {
    let raw = raw?;
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    match parse_date(trimmed) {
        Some(d) => Some(d.format("%Y-%m-%d").to_string()),
        None => Some(raw.to_string()),
    }
}

/// [`normalize_date`] over a cell; native numbers are treated as their text.
pub fn normalize_date_cell(raw: Option<&Cell>) -> Option<String> {
    match raw? {
        Cell::Empty => None,
        Cell::Text(s) => normalize_date(Some(s)),
        other => normalize_date(Some(&other.to_string())),
    }
}

/// Parse a trimmed date, optionally followed by a time of day.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_local().date());
    }
    let (date_part, time_part) = match s.find([' ', 'T']) {
        Some(idx) => (&s[..idx], Some(s[idx + 1..].trim())),
        None => (s, None),
    };
    if let Some(t) = time_part {
        if !TIME_FORMATS
            .iter()
            .any(|f| NaiveTime::parse_from_str(t, f).is_ok())
        {
            return None;
        }
    }
    parse_date_only(date_part)
}

/// `Y-M-D` when the first field has four digits, otherwise `D-M-Y`. Any one
/// of `.`, `/`, `-` may separate the fields, but it must be the same one.
fn parse_date_only(s: &str) -> Option<NaiveDate> {
    let sep = s.chars().find(|c| SEPARATORS.contains(c))?;
    let parts: Vec<&str> = s.split(sep).collect();
    if parts.len() != 3
        || parts
            .iter()
            .any(|p| p.is_empty() || !p.bytes().all(|b| b.is_ascii_digit()))
    {
        return None;
    }

    let (year, month, day) = if parts[0].len() == 4 {
        (parts[0].parse::<i32>().ok()?, parts[1], parts[2])
    } else {
        let year = match parts[2].len() {
            4 => parts[2].parse::<i32>().ok()?,
            2 => two_digit_year(parts[2].parse::<i32>().ok()?),
            _ => return None,
        };
        (year, parts[1], parts[0])
    };
    if month.len() > 2 || day.len() > 2 {
        return None;
    }
    NaiveDate::from_ymd_opt(year, month.parse().ok()?, day.parse().ok()?)
}

/// POSIX `%y` pivot: 69..=99 is the 1900s, 00..=68 the 2000s.
fn two_digit_year(yy: i32) -> i32 {
    if yy >= 69 {
        1900 + yy
    } else {
        2000 + yy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn norm(s: &str) -> Option<String> {
        normalize_date(Some(s))
    }

    #[test]
    fn test_day_first_formats() {
        assert_eq!(norm("17.10.2025").as_deref(), Some("2025-10-17"));
        assert_eq!(norm("17/10/2025").as_deref(), Some("2025-10-17"));
        assert_eq!(norm("17-10-2025").as_deref(), Some("2025-10-17"));
        assert_eq!(norm("1.2.2025").as_deref(), Some("2025-02-01"));
        assert_eq!(norm("05/04/2025").as_deref(), Some("2025-04-05"));
        assert_eq!(norm("17.10.25").as_deref(), Some("2025-10-17"));
        assert_eq!(norm("01.01.99").as_deref(), Some("1999-01-01"));
    }

    #[test]
    fn test_iso_and_times() {
        assert_eq!(norm("2025-10-17").as_deref(), Some("2025-10-17"));
        assert_eq!(norm("2025/10/17").as_deref(), Some("2025-10-17"));
        assert_eq!(norm("2025.10.17").as_deref(), Some("2025-10-17"));
        assert_eq!(norm("2025-10-17 13:45:00").as_deref(), Some("2025-10-17"));
        assert_eq!(norm("2025-10-17T13:45:00").as_deref(), Some("2025-10-17"));
        assert_eq!(norm("2025-10-17T23:30:00+03:00").as_deref(), Some("2025-10-17"));
        assert_eq!(norm("17.10.2025 08:15").as_deref(), Some("2025-10-17"));
        assert_eq!(norm("  17.10.2025  ").as_deref(), Some("2025-10-17"));
    }

    #[test]
    fn test_unparseable_passes_through() {
        assert_eq!(norm("not-a-date").as_deref(), Some("not-a-date"));
        assert_eq!(norm("32.01.2025").as_deref(), Some("32.01.2025"));
        assert_eq!(norm(" 17.13.2025 ").as_deref(), Some(" 17.13.2025 "));
        assert_eq!(norm("17.10/2025").as_deref(), Some("17.10/2025"));
        assert_eq!(norm("17.10.2025 noon").as_deref(), Some("17.10.2025 noon"));
    }

    #[test]
    fn test_absent() {
        assert_eq!(normalize_date(None), None);
        assert_eq!(norm(""), None);
        assert_eq!(norm("   "), None);
        assert_eq!(normalize_date_cell(Some(&Cell::Empty)), None);
        assert_eq!(normalize_date_cell(None), None);
    }

    #[test]
    fn test_cells() {
        assert_eq!(
            normalize_date_cell(Some(&Cell::from("17.10.2025"))).as_deref(),
            Some("2025-10-17")
        );
        assert_eq!(
            normalize_date_cell(Some(&Cell::Int(20251017))).as_deref(),
            Some("20251017")
        );
    }
}

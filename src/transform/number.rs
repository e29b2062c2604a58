use tracing::warn;

use crate::table::Cell;

/// A parsed numeric cell. Integers stay integers so `"100"` and `"100.0"`
/// remain distinguishable downstream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    pub fn as_f64(self) -> f64 {
        match self {
            Number::Int(i) => i as f64,
            Number::Float(f) => f,
        }
    }

    /// Truncate toward zero and clamp to `0..=u32::MAX`; used for the
    /// value-slot counts. See [`Number::exceeds_count_range`].
    pub fn as_count(self) -> u32 {
        match self {
            Number::Int(i) => i.clamp(0, u32::MAX as i64) as u32,
            // `as` saturates, NaN becomes 0
            Number::Float(f) => f.trunc().max(0.0) as u32,
        }
    }

    /// True when [`Number::as_count`] would clamp at `u32::MAX`.
    pub fn exceeds_count_range(self) -> bool {
        match self {
            Number::Int(i) => i > u32::MAX as i64,
            Number::Float(f) => f.trunc() > u32::MAX as f64,
        }
    }
}

/// Characters dropped before parsing: spaces (regular and non-breaking) and
/// the apostrophe-like thousands separators.
const STRIPPED: &[char] = &['\u{00A0}', ' ', '\'', '\u{2019}', '`'];

/// Normalize a locale-formatted number. `None` means "no value", never zero.
///
/// Commas are always decimal separators; there is no thousands-comma support.
pub fn normalize_number(raw: &Cell) -> Option<Number> {
    match raw {
        Cell::Empty | Cell::Bool(_) => None,
        Cell::Int(i) => Some(Number::Int(*i)),
        Cell::Float(f) if f.is_finite() => Some(Number::Float(*f)),
        Cell::Float(_) => None,
        Cell::Text(s) => normalize_number_str(s),
    }
}

pub fn normalize_number_str(raw: &str) -> Option<Number> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let cleaned: String = trimmed
        .chars()
        .filter(|c| !STRIPPED.contains(c))
        .map(|c| if c == ',' { '.' } else { c })
        .collect();

    if cleaned.contains(['.', 'e', 'E']) {
        return parse_finite(&cleaned);
    }
    match cleaned.parse::<i64>() {
        Ok(i) => Some(Number::Int(i)),
        // integers too large for i64 still have a float value
        Err(_) => parse_finite(&cleaned),
    }
}

fn parse_finite(s: &str) -> Option<Number> {
    s.parse::<f64>()
        .ok()
        .filter(|f| f.is_finite())
        .map(Number::Float)
}

/// Count for one value slot: non-negative, parse failures read as 0.
///
/// Counts beyond `u32::MAX` saturate and are logged, since the row would
/// expand into that many features.
pub fn count_from(raw: Option<&Cell>) -> u32 {
    let Some(n) = raw.and_then(normalize_number) else {
        return 0;
    };
    if n.exceeds_count_range() {
        warn!(value = n.as_f64(), "count saturated at u32::MAX");
    }
    n.as_count()
}

/// Coordinate value: parse failures stay `None` so the row gets dropped.
pub fn coordinate_from(raw: Option<&Cell>) -> Option<f64> {
    raw.and_then(normalize_number).map(Number::as_f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn n(s: &str) -> Option<Number> {
        normalize_number(&Cell::from(s))
    }

    #[test]
    fn test_decimal_comma() {
        assert_eq!(n("12,34"), Some(Number::Float(12.34)));
        assert_eq!(n("  56,78 "), Some(Number::Float(56.78)));
        assert_eq!(n("100"), Some(Number::Int(100)));
    }

    #[test]
    fn test_no_value() {
        assert_eq!(n(""), None);
        assert_eq!(n("   "), None);
        assert_eq!(normalize_number(&Cell::Empty), None);
        assert_eq!(normalize_number(&Cell::Bool(true)), None);
        assert_eq!(n("abc"), None);
        assert_eq!(n("1.2.3"), None);
        assert_eq!(n("nan"), None);
    }

    #[test]
    fn test_separators_removed() {
        assert_eq!(n("1 234,5"), Some(Number::Float(1234.5)));
        assert_eq!(n("1\u{00A0}234"), Some(Number::Int(1234)));
        assert_eq!(n("1'000"), Some(Number::Int(1000)));
        assert_eq!(n("1\u{2019}000"), Some(Number::Int(1000)));
        assert_eq!(n("2`500,25"), Some(Number::Float(2500.25)));
        assert_eq!(n("1e3"), Some(Number::Float(1000.0)));
        assert_eq!(n("-3"), Some(Number::Int(-3)));
    }

    #[test]
    fn test_native_numbers_pass_through() {
        assert_eq!(normalize_number(&Cell::Int(7)), Some(Number::Int(7)));
        assert_eq!(normalize_number(&Cell::Float(0.5)), Some(Number::Float(0.5)));
    }

    #[test]
    fn test_count_vs_coordinate_asymmetry() {
        let bad = Cell::from("n/a");
        assert_eq!(count_from(Some(&bad)), 0);
        assert_eq!(coordinate_from(Some(&bad)), None);
        assert_eq!(count_from(None), 0);
        assert_eq!(coordinate_from(None), None);
        assert_eq!(count_from(Some(&Cell::from("-4"))), 0);
        assert_eq!(count_from(Some(&Cell::from("2,9"))), 2);
        assert_eq!(count_from(Some(&Cell::Float(3.7))), 3);
        assert_eq!(coordinate_from(Some(&Cell::from("30"))), Some(30.0));
    }

    #[test]
    fn test_non_finite_native_floats_are_no_value() {
        assert_eq!(normalize_number(&Cell::Float(f64::NAN)), None);
        assert_eq!(normalize_number(&Cell::Float(f64::INFINITY)), None);
        assert_eq!(coordinate_from(Some(&Cell::Float(f64::NAN))), None);
        assert_eq!(coordinate_from(Some(&Cell::Float(f64::NEG_INFINITY))), None);
        assert_eq!(count_from(Some(&Cell::Float(f64::NAN))), 0);
    }

    #[test]
    fn test_oversized_counts_saturate_and_are_flagged() {
        let huge = n("1e12").unwrap();
        assert!(huge.exceeds_count_range());
        assert_eq!(count_from(Some(&Cell::from("1e12"))), u32::MAX);
        assert!(Number::Int(5_000_000_000).exceeds_count_range());
        assert!(!Number::Int(u32::MAX as i64).exceeds_count_range());
        assert!(!Number::Float(3.9).exceeds_count_range());
        assert!(!Number::Int(-7).exceeds_count_range());
    }

    #[test]
    fn test_huge_integer_falls_back_to_float() {
        assert_eq!(
            n("99999999999999999999"),
            Some(Number::Float(99999999999999999999.0))
        );
    }
}

//! Column-role detection by label.
//!
//! Sheets arrive with Ukrainian, Russian or English headers in any order, so
//! every role is found by name: exact case-insensitive match first, then a
//! substring match.

use serde::Serialize;

use crate::error::SchemaResolutionError;

/// Number of numbered value columns every table must carry.
pub const VALUE_SLOTS: usize = 10;

pub const DATE_CANDIDATES: &[&str] = &["Дата", "date", "d_date", "Date"];
pub const REGION_CANDIDATES: &[&str] = &["Область", "region", "t_region", "Region"];
pub const CITY_CANDIDATES: &[&str] = &["Місто", "city", "t_city", "City", "місто"];
pub const LON_CANDIDATES: &[&str] = &["long", "longitude", "lon", "lng", "Long", "Longitude"];
pub const LAT_CANDIDATES: &[&str] = &["lat", "latitude", "Lat", "LAT", "Latitude"];

/// Tokens that mark a column as "some value column" for the numbered fallback.
const VALUE_TOKENS: &[&str] = &["value", "val", "знач"];

/// Label spellings tried for value column `i` (1-based).
pub fn value_candidates(i: usize) -> Vec<String> {
    vec![
        format!("Value {i}"),
        format!("Value_{i}"),
        format!("Value{i}"),
        format!("Значення {i}"),
        format!("Значение {i}"),
        format!("Знач_{i}"),
        format!("Val {i}"),
        format!("V{i}"),
        format!("v{i}"),
        format!("i_value_{i}"),
        i.to_string(),
    ]
}

/// First column matching any candidate.
///
/// Exact pass: trimmed, lower-cased label equality, candidates in order; when
/// two labels collide after lower-casing the later one wins. Substring pass:
/// candidates in order, then columns in table order.
pub fn find_col_like<'a, S: AsRef<str>>(columns: &'a [String], candidates: &[S]) -> Option<&'a str> {
    let lowered: Vec<String> = columns.iter().map(|c| c.trim().to_lowercase()).collect();

    for cand in candidates {
        let cand = cand.as_ref().to_lowercase();
        if let Some(idx) = lowered.iter().rposition(|l| *l == cand) {
            return Some(columns[idx].as_str());
        }
    }
    for cand in candidates {
        let cand = cand.as_ref().to_lowercase();
        if let Some(idx) = lowered.iter().position(|l| l.contains(&cand)) {
            return Some(columns[idx].as_str());
        }
    }
    None
}

/// Column for value slot `i` (1-based): the candidate search, then any label
/// carrying both the digits of `i` and a generic value token.
pub fn find_value_col(columns: &[String], i: usize) -> Option<&str> {
    if let Some(c) = find_col_like(columns, &value_candidates(i)) {
        return Some(c);
    }
    let digits = i.to_string();
    columns
        .iter()
        .find(|c| {
            let lower = c.to_lowercase();
            c.contains(&digits) && VALUE_TOKENS.iter().any(|t| lower.contains(t))
        })
        .map(String::as_str)
}

/// Which column plays which role. Built once per table, read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnRoleMap {
    #[serde(rename = "date_col")]
    pub date: Option<String>,
    #[serde(rename = "region_col")]
    pub region: Option<String>,
    #[serde(rename = "city_col")]
    pub city: Option<String>,
    #[serde(rename = "lon_col")]
    pub longitude: Option<String>,
    #[serde(rename = "lat_col")]
    pub latitude: Option<String>,
    #[serde(rename = "value_cols")]
    pub values: [String; VALUE_SLOTS],
}

impl ColumnRoleMap {
    /// Resolve every role. Missing optional roles stay `None`; a missing
    /// value column fails the whole table.
    pub fn resolve(columns: &[String]) -> Result<Self, SchemaResolutionError> {
        let owned = |c: Option<&str>| c.map(str::to_string);

        let mut values: Vec<String> = Vec::with_capacity(VALUE_SLOTS);
        for i in 1..=VALUE_SLOTS {
            match find_value_col(columns, i) {
                Some(c) => values.push(c.to_string()),
                None => {
                    return Err(SchemaResolutionError {
                        role: format!("Value {i}"),
                        available: columns.to_vec(),
                    })
                }
            }
        }
        let values: [String; VALUE_SLOTS] = values
            .try_into()
            .map_err(|_| SchemaResolutionError {
                role: "value columns".into(),
                available: columns.to_vec(),
            })?;

        Ok(Self {
            date: owned(find_col_like(columns, DATE_CANDIDATES)),
            region: owned(find_col_like(columns, REGION_CANDIDATES)),
            city: owned(find_col_like(columns, CITY_CANDIDATES)),
            longitude: owned(find_col_like(columns, LON_CANDIDATES)),
            latitude: owned(find_col_like(columns, LAT_CANDIDATES)),
            values,
        })
    }
}

/// Value columns found without failing on gaps; `None` where a slot is missing.
pub fn resolve_values_lenient(columns: &[String]) -> [Option<String>; VALUE_SLOTS] {
    std::array::from_fn(|k| find_value_col(columns, k + 1).map(str::to_string))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn full_headers() -> Vec<String> {
        let mut h = labels(&["Дата", "Область", "Місто", "long", "lat"]);
        h.extend((1..=10).map(|i| format!("Value {i}")));
        h
    }

    #[test]
    fn test_resolves_standard_headers() -> Result<(), SchemaResolutionError> {
        let roles = ColumnRoleMap::resolve(&full_headers())?;
        assert_eq!(roles.date.as_deref(), Some("Дата"));
        assert_eq!(roles.region.as_deref(), Some("Область"));
        assert_eq!(roles.city.as_deref(), Some("Місто"));
        assert_eq!(roles.longitude.as_deref(), Some("long"));
        assert_eq!(roles.latitude.as_deref(), Some("lat"));
        assert_eq!(roles.values[0], "Value 1");
        assert_eq!(roles.values[9], "Value 10");
        Ok(())
    }

    #[test]
    fn test_resolution_is_idempotent() -> Result<(), SchemaResolutionError> {
        let headers = full_headers();
        assert_eq!(ColumnRoleMap::resolve(&headers)?, ColumnRoleMap::resolve(&headers)?);
        Ok(())
    }

    #[test]
    fn test_exact_beats_substring() {
        let cols = labels(&["Longitude (deg)", "LONG"]);
        assert_eq!(find_col_like(&cols, LON_CANDIDATES), Some("LONG"));
    }

    #[test]
    fn test_substring_candidate_then_column_order() {
        let cols = labels(&["my lng", "the longitude"]);
        // "long" is tried before "lng", and matches inside "the longitude"
        assert_eq!(find_col_like(&cols, LON_CANDIDATES), Some("the longitude"));
        let cols = labels(&["Дата опитування", "updated date"]);
        assert_eq!(find_col_like(&cols, DATE_CANDIDATES), Some("Дата опитування"));
    }

    #[test]
    fn test_exact_match_is_case_insensitive_and_trimmed() {
        let cols = labels(&["  LATITUDE "]);
        assert_eq!(find_col_like(&cols, LAT_CANDIDATES), Some("  LATITUDE "));
        let cols = labels(&["місто"]);
        assert_eq!(find_col_like(&cols, CITY_CANDIDATES), Some("місто"));
    }

    #[test]
    fn test_value_column_spellings() {
        let cols = labels(&["Знач_3", "v4", "i_value_5", "Значення 6"]);
        assert_eq!(find_value_col(&cols, 3), Some("Знач_3"));
        assert_eq!(find_value_col(&cols, 4), Some("v4"));
        assert_eq!(find_value_col(&cols, 5), Some("i_value_5"));
        assert_eq!(find_value_col(&cols, 6), Some("Значення 6"));
    }

    #[test]
    fn test_value_token_fallback() {
        let cols = labels(&["count (val) #7"]);
        assert_eq!(find_value_col(&cols, 7), Some("count (val) #7"));
        let cols = labels(&["notes 7"]);
        // bare "7" is itself a candidate and matches as a substring
        assert_eq!(find_value_col(&cols, 7), Some("notes 7"));
        assert_eq!(find_value_col(&labels(&["notes"]), 7), None);
    }

    #[test]
    fn test_missing_value_column_is_fatal() {
        let headers: Vec<String> = full_headers()
            .into_iter()
            .filter(|h| h != "Value 7")
            .collect();
        let err = ColumnRoleMap::resolve(&headers).unwrap_err();
        assert_eq!(err.role, "Value 7");
        assert_eq!(err.available, headers);
        assert!(err.to_string().contains("Available columns"));
    }

    #[test]
    fn test_empty_header_fails() {
        let err = ColumnRoleMap::resolve(&[]).unwrap_err();
        assert_eq!(err.role, "Value 1");
        assert!(err.available.is_empty());
    }

    #[test]
    fn test_optional_roles_may_be_missing() -> Result<(), SchemaResolutionError> {
        let headers: Vec<String> = (1..=10).map(|i| format!("Value_{i}")).collect();
        let roles = ColumnRoleMap::resolve(&headers)?;
        assert_eq!(roles.date, None);
        assert_eq!(roles.longitude, None);
        Ok(())
    }

    #[test]
    fn test_meta_serialization() -> Result<(), Box<dyn std::error::Error>> {
        let roles = ColumnRoleMap::resolve(&full_headers())?;
        let meta = serde_json::to_value(&roles)?;
        assert_eq!(meta["lon_col"], "long");
        assert_eq!(meta["value_cols"][2], "Value 3");
        Ok(())
    }

    #[test]
    fn test_lenient_values() {
        let cols = labels(&["Value 1", "Value 2"]);
        let found = resolve_values_lenient(&cols);
        assert_eq!(found[0].as_deref(), Some("Value 1"));
        assert_eq!(found[1].as_deref(), Some("Value 2"));
        assert!(found[2..].iter().all(Option::is_none));
    }
}

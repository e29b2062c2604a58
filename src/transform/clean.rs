//! Sheet cleanup before export: decimal commas in coordinates become dots and
//! value columns become plain integers. Unlike [`ColumnRoleMap::resolve`],
//! nothing here fails on a missing column.
//!
//! [`ColumnRoleMap::resolve`]: super::columns::ColumnRoleMap::resolve

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use tracing::info;

use super::columns::{find_col_like, resolve_values_lenient, LAT_CANDIDATES, LON_CANDIDATES};
use super::number::{normalize_number_str, Number};
use crate::table::{Cell, RawTable};

/// How many trailing columns are scanned when coordinates have no usable label.
const COORD_SCAN_TAIL: usize = 4;

static DECIMAL_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"[0-9]+[,.][0-9]+").unwrap());

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectedColumns {
    pub lon: Option<String>,
    pub lat: Option<String>,
    pub values: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CleanedTable {
    pub table: RawTable,
    pub detected: DetectedColumns,
}

/// Drop spaces/NBSP and turn the decimal comma into a dot. Blank stays blank.
pub fn clean_decimal(cell: &Cell) -> Cell {
    match cell {
        Cell::Text(s) => {
            let cleaned: String = s
                .chars()
                .filter(|c| *c != ' ' && *c != '\u{00A0}')
                .map(|c| if c == ',' { '.' } else { c })
                .collect();
            if cleaned.is_empty() {
                Cell::Empty
            } else {
                Cell::Text(cleaned)
            }
        }
        other => other.clone(),
    }
}

/// Integer count, truncated; anything unparseable becomes 0.
pub fn clean_count(cell: &Cell) -> Cell {
    let n = match cell {
        Cell::Int(i) => *i,
        Cell::Float(f) if f.is_finite() => f.trunc() as i64,
        Cell::Text(s) => normalize_number_str(s)
            .map(|n| match n {
                Number::Int(i) => i,
                Number::Float(f) => f.trunc() as i64,
            })
            .unwrap_or(0),
        _ => 0,
    };
    Cell::Int(n)
}

/// First two of the last few columns whose values look like decimals.
fn guess_coordinate_columns(table: &RawTable) -> Option<(String, String)> {
    let start = table.headers.len().saturating_sub(COORD_SCAN_TAIL);
    let found: Vec<&String> = table.headers[start..]
        .iter()
        .filter(|h| {
            table.rows.iter().any(|r| {
                r.get(h)
                    .map(|c| DECIMAL_RE.is_match(&c.to_string()))
                    .unwrap_or(false)
            })
        })
        .collect();
    match found.as_slice() {
        [lon, lat, ..] => Some(((*lon).clone(), (*lat).clone())),
        _ => None,
    }
}

fn map_column(table: &mut RawTable, label: &str, f: impl Fn(&Cell) -> Cell) {
    for row in table.rows.iter_mut() {
        *row = row
            .iter()
            .map(|(l, c)| {
                let c = if l == label { f(c) } else { c.clone() };
                (l.to_string(), c)
            })
            .collect();
    }
}

pub fn clean_table(source: &RawTable) -> CleanedTable {
    let cols = &source.headers;
    let mut lon = find_col_like(cols, LON_CANDIDATES).map(str::to_string);
    let mut lat = find_col_like(cols, LAT_CANDIDATES).map(str::to_string);
    let values: Vec<String> = resolve_values_lenient(cols).into_iter().flatten().collect();

    if lon.is_none() || lat.is_none() {
        if let Some((x, y)) = guess_coordinate_columns(source) {
            lon = Some(x);
            lat = Some(y);
        }
    }

    let mut table = source.clone();
    for coord in [&lon, &lat].into_iter().flatten() {
        map_column(&mut table, coord, clean_decimal);
    }
    for vc in &values {
        map_column(&mut table, vc, clean_count);
    }

    let detected = DetectedColumns { lon, lat, values };
    info!(
        lon = ?detected.lon,
        lat = ?detected.lat,
        values = ?detected.values,
        "detected columns"
    );
    CleanedTable { table, detected }
}

use anyhow::{anyhow, Context, Result};
use calamine::{open_workbook_auto, Data, Reader};
use chrono::Timelike;
use std::path::Path;
use tracing::{debug, info};

use super::{Cell, RawTable};

/// Extensions handled by the workbook reader; everything else is treated as text.
pub const WORKBOOK_EXTENSIONS: &[&str] = &["xlsx", "xlsm", "xlsb", "xls", "ods"];

pub fn is_workbook(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| WORKBOOK_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Convert a workbook cell, keeping native numbers native.
pub fn cell_from_data(data: &Data) -> Cell {
    match data {
        Data::Empty => Cell::Empty,
        Data::Int(i) => Cell::Int(*i),
        Data::Float(f) => Cell::Float(*f),
        Data::Bool(b) => Cell::Bool(*b),
        Data::String(s) if s.is_empty() => Cell::Empty,
        Data::String(s) => Cell::Text(s.clone()),
        Data::DateTimeIso(s) | Data::DurationIso(s) => Cell::Text(s.clone()),
        Data::DateTime(dt) => match dt.as_datetime() {
            Some(ndt) if ndt.time().num_seconds_from_midnight() == 0 => {
                Cell::Text(ndt.format("%Y-%m-%d").to_string())
            }
            Some(ndt) => Cell::Text(ndt.format("%Y-%m-%d %H:%M:%S").to_string()),
            None => Cell::Float(dt.as_f64()),
        },
        Data::Error(_) => Cell::Empty,
    }
}

/// Read the first worksheet of a workbook. Row 0 is the header.
#[tracing::instrument(level = "info", skip(path), fields(path = %path.as_ref().display()))]
pub fn read_workbook(path: impl AsRef<Path>) -> Result<RawTable> {
    let path = path.as_ref();
    let mut workbook = open_workbook_auto(path)
        .with_context(|| format!("opening workbook {}", path.display()))?;
    let first = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| anyhow!("workbook {} has no worksheets", path.display()))?;
    let range = workbook
        .worksheet_range(&first)
        .with_context(|| format!("reading worksheet {:?}", first))?;

    let mut rows = range.rows();
    let headers: Vec<String> = match rows.next() {
        Some(h) => h.iter().map(|d| d.to_string()).collect(),
        None => return Ok(RawTable::default()),
    };
    let grid: Vec<Vec<Cell>> = rows
        .map(|r| r.iter().map(cell_from_data).collect::<Vec<_>>())
        .filter(|cells| !cells.iter().all(Cell::is_empty))
        .collect();
    debug!(sheet = %first, "worksheet loaded");

    let table = RawTable::from_grid(headers, grid);
    info!(rows = table.len(), columns = table.headers.len(), "workbook read");
    Ok(table)
}

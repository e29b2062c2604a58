//! Raw tabular input: header labels plus untyped cells.
//!
//! Every reader ([`csv`], [`xlsx`], [`sheets`]) produces the same [`RawTable`]
//! so the transform step never cares where the rows came from.

pub mod csv;
pub mod sheets;
pub mod source;
pub mod xlsx;

use std::fmt;

pub use source::TableSource;

/// One spreadsheet cell, as close to the source representation as possible.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl Cell {
    pub fn is_empty(&self) -> bool {
        match self {
            Cell::Empty => true,
            Cell::Text(s) => s.trim().is_empty(),
            _ => false,
        }
    }

    /// Text form of the cell, `None` for `Empty`.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Cell::Empty => None,
            other => Some(other.to_string()),
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Empty => Ok(()),
            Cell::Text(s) => f.write_str(s),
            Cell::Int(i) => write!(f, "{}", i),
            Cell::Float(v) => write!(f, "{}", v),
            Cell::Bool(b) => write!(f, "{}", b),
        }
    }
}

impl From<&str> for Cell {
    fn from(s: &str) -> Self {
        Cell::Text(s.to_string())
    }
}

impl From<String> for Cell {
    fn from(s: String) -> Self {
        Cell::Text(s)
    }
}

impl From<i64> for Cell {
    fn from(v: i64) -> Self {
        Cell::Int(v)
    }
}

impl From<f64> for Cell {
    fn from(v: f64) -> Self {
        Cell::Float(v)
    }
}

/// Ordered `label → cell` mapping for a single data row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRow {
    cells: Vec<(String, Cell)>,
}

impl RawRow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, label: impl Into<String>, cell: impl Into<Cell>) {
        self.cells.push((label.into(), cell.into()));
    }

    /// Look up a cell by its exact label. A duplicated label resolves to its
    /// last occurrence.
    pub fn get(&self, label: &str) -> Option<&Cell> {
        self.cells
            .iter()
            .rev()
            .find(|(l, _)| l == label)
            .map(|(_, c)| c)
    }

    /// `get` for an optional role column; unresolved roles read as absent.
    pub fn get_opt(&self, label: Option<&str>) -> Option<&Cell> {
        label.and_then(|l| self.get(l))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Cell)> {
        self.cells.iter().map(|(l, c)| (l.as_str(), c))
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

impl<L: Into<String>, C: Into<Cell>> FromIterator<(L, C)> for RawRow {
    fn from_iter<T: IntoIterator<Item = (L, C)>>(iter: T) -> Self {
        let mut row = RawRow::new();
        for (l, c) in iter {
            row.push(l, c);
        }
        row
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawTable {
    /// Column labels from the first row, whitespace-trimmed.
    pub headers: Vec<String>,
    pub rows: Vec<RawRow>,
}

impl RawTable {
    /// Build a table from a header row plus positional data rows.
    ///
    /// Short rows are padded with `Empty`; cells past the header width are
    /// dropped, matching how the sheet exports behave.
    pub fn from_grid(headers: Vec<String>, grid: Vec<Vec<Cell>>) -> Self {
        let headers: Vec<String> = headers.into_iter().map(|h| h.trim().to_string()).collect();
        let rows = grid
            .into_iter()
            .map(|mut cells| {
                cells.resize(headers.len(), Cell::Empty);
                headers.iter().cloned().zip(cells).collect::<RawRow>()
            })
            .collect();
        Self { headers, rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_label_last_wins() {
        let row: RawRow = vec![("a", Cell::from("1")), ("a", Cell::from("2"))]
            .into_iter()
            .collect();
        assert_eq!(row.get("a"), Some(&Cell::from("2")));
        assert_eq!(row.get("b"), None);
    }

    #[test]
    fn test_from_grid_trims_and_pads() {
        let table = RawTable::from_grid(
            vec![" long ".into(), "lat".into(), "x".into()],
            vec![vec![Cell::from("1"), Cell::from("2")], vec![
                Cell::from("3"),
                Cell::from("4"),
                Cell::from("5"),
                Cell::from("6"),
            ]],
        );
        assert_eq!(table.headers, vec!["long", "lat", "x"]);
        assert_eq!(table.rows[0].get("x"), Some(&Cell::Empty));
        assert_eq!(table.rows[1].len(), 3);
        assert_eq!(table.rows[1].get("long"), Some(&Cell::from("3")));
    }

    #[test]
    fn test_cell_emptiness() {
        assert!(Cell::Empty.is_empty());
        assert!(Cell::from("   ").is_empty());
        assert!(!Cell::Int(0).is_empty());
        assert_eq!(Cell::Float(12.5).as_text().as_deref(), Some("12.5"));
    }
}

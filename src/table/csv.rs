use anyhow::{Context, Result};
use ::csv::{ReaderBuilder, WriterBuilder};
use std::{
    fs::{self, File},
    io::{BufWriter, Cursor, Write},
    path::Path,
};
use tracing::debug;

use super::{Cell, RawTable};

const CANDIDATE_DELIMITERS: [u8; 4] = [b',', b';', b'\t', b'|'];
const UTF8_BOM: &str = "\u{feff}";

/// Guess the field delimiter from the header line.
///
/// Exports from localized spreadsheets use `;` whenever `,` is the decimal
/// separator, so we pick whichever candidate occurs most often outside quotes.
pub fn sniff_delimiter(text: &str) -> u8 {
    let header = text.lines().next().unwrap_or_default();
    let mut counts = [0usize; CANDIDATE_DELIMITERS.len()];
    let mut in_quotes = false;
    for b in header.bytes() {
        if b == b'"' {
            in_quotes = !in_quotes;
            continue;
        }
        if in_quotes {
            continue;
        }
        if let Some(i) = CANDIDATE_DELIMITERS.iter().position(|d| *d == b) {
            counts[i] += 1;
        }
    }
    // ties resolve to the earlier candidate, i.e. ',' first
    let mut best = 0;
    for i in 1..counts.len() {
        if counts[i] > counts[best] {
            best = i;
        }
    }
    CANDIDATE_DELIMITERS[best]
}

/// Parse delimited text. Every cell comes back as `Text`; blank lines are skipped.
pub fn parse_csv_str(text: &str) -> Result<RawTable> {
    let text = text.strip_prefix(UTF8_BOM).unwrap_or(text);
    if text.trim().is_empty() {
        return Ok(RawTable::default());
    }
    let delimiter = sniff_delimiter(text);
    debug!(delimiter = %(delimiter as char).escape_default(), "sniffed delimiter");

    let mut rdr = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(Cursor::new(text.as_bytes()));

    let mut headers: Option<Vec<String>> = None;
    let mut grid = Vec::new();
    for (idx, result) in rdr.records().enumerate() {
        let record = result.with_context(|| format!("CSV parse error at record {}", idx))?;
        if record.iter().all(|f| f.trim().is_empty()) {
            continue;
        }
        if headers.is_none() {
            headers = Some(record.iter().map(|s| s.trim().to_string()).collect());
            continue;
        }
        let cells: Vec<Cell> = record
            .iter()
            .map(|s| {
                if s.is_empty() {
                    Cell::Empty
                } else {
                    Cell::Text(s.to_string())
                }
            })
            .collect();
        grid.push(cells);
    }

    Ok(RawTable::from_grid(headers.unwrap_or_default(), grid))
}

pub fn read_csv_bytes(bytes: &[u8]) -> Result<RawTable> {
    let text = String::from_utf8_lossy(bytes);
    parse_csv_str(&text)
}

#[tracing::instrument(level = "info", skip(path), fields(path = %path.as_ref().display()))]
pub fn read_csv_file(path: impl AsRef<Path>) -> Result<RawTable> {
    let path = path.as_ref();
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let table = read_csv_bytes(&bytes)?;
    debug!(rows = table.len(), columns = table.headers.len(), "csv loaded");
    Ok(table)
}

/// Write `headers` + `records` as comma-separated UTF-8 with a BOM, so the
/// file opens with the right encoding in spreadsheet software.
pub fn write_csv_with_bom<I, R>(path: impl AsRef<Path>, headers: &[&str], records: I) -> Result<()>
where
    I: IntoIterator<Item = R>,
    R: IntoIterator,
    R::Item: AsRef<[u8]>,
{
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut out = BufWriter::new(
        File::create(path).with_context(|| format!("creating {}", path.display()))?,
    );
    out.write_all(UTF8_BOM.as_bytes())?;
    let mut wtr = WriterBuilder::new().from_writer(out);
    wtr.write_record(headers)?;
    for record in records {
        wtr.write_record(record)?;
    }
    wtr.flush()
        .with_context(|| format!("flushing {}", path.display()))?;
    Ok(())
}

/// Dump a whole table; empty cells are written as empty fields.
pub fn write_table_csv(path: impl AsRef<Path>, table: &RawTable) -> Result<()> {
    let headers: Vec<&str> = table.headers.iter().map(String::as_str).collect();
    let records = table.rows.iter().map(|row| {
        row.iter()
            .map(|(_, cell)| cell.to_string())
            .collect::<Vec<_>>()
    });
    write_csv_with_bom(path, &headers, records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_sniff_semicolon_export() {
        let text = "Дата;Область;long;lat\n17.10.2025;Київська;30,52;50,45\n";
        assert_eq!(sniff_delimiter(text), b';');
        assert_eq!(sniff_delimiter("a,b,c\n1,2,3"), b',');
        assert_eq!(sniff_delimiter("a\tb\n"), b'\t');
        assert_eq!(sniff_delimiter("\"x;y\",b,c\n"), b',');
    }

    #[test]
    fn test_parse_semicolon_with_decimal_commas() -> Result<()> {
        let table = parse_csv_str("Дата;long;lat\n17.10.2025;30,52;50,45\n;;\n")?;
        assert_eq!(table.headers, vec!["Дата", "long", "lat"]);
        assert_eq!(table.len(), 1);
        assert_eq!(table.rows[0].get("long"), Some(&Cell::from("30,52")));
        Ok(())
    }

    #[test]
    fn test_bom_and_trimmed_headers() -> Result<()> {
        let mut tmp = NamedTempFile::new()?;
        tmp.write_all("\u{feff} date , long\n2025-01-02,1\n".as_bytes())?;
        let table = read_csv_file(tmp.path())?;
        assert_eq!(table.headers, vec!["date", "long"]);
        assert_eq!(table.rows[0].get("date"), Some(&Cell::from("2025-01-02")));
        Ok(())
    }

    #[test]
    fn test_empty_input() -> Result<()> {
        let table = parse_csv_str("")?;
        assert!(table.headers.is_empty());
        assert!(table.is_empty());
        Ok(())
    }

    #[test]
    fn test_empty_cells_and_quoted_fields() -> Result<()> {
        let table = parse_csv_str("a,b,c\n\"1,5\",,x\n")?;
        assert_eq!(table.rows[0].get("a"), Some(&Cell::from("1,5")));
        assert_eq!(table.rows[0].get("b"), Some(&Cell::Empty));
        Ok(())
    }

    #[test]
    fn test_write_table_roundtrips_through_reader() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("out").join("clean.csv");
        let table = parse_csv_str("long;lat;note\n30.52;50.45;\"a, b\"\n1;;x\n")?;
        write_table_csv(&path, &table)?;

        let raw = fs::read(&path)?;
        assert!(raw.starts_with(UTF8_BOM.as_bytes()));
        let back = read_csv_file(&path)?;
        assert_eq!(back, table);
        Ok(())
    }
}

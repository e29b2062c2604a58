use anyhow::{Context, Result};
use serde::Serialize;
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::{info, instrument};

use super::parquet::write_features_parquet;
use crate::table::csv::write_csv_with_bom;
use crate::transform::feature::indicator_name;
use crate::transform::{Attributes, Feature, VALUE_SLOTS};

pub const ERROR_META_FILE: &str = "processing_error_meta.json";

/// Files produced by [`export_features`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportPaths {
    pub json: PathBuf,
    /// Only written when there is at least one feature.
    pub preview_csv: Option<PathBuf>,
    pub parquet: PathBuf,
}

/// Header of the preview CSV, attribute order.
pub fn preview_header() -> Vec<String> {
    let mut h: Vec<String> = ["d_date", "t_region", "t_city", "long", "lat"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    h.extend((0..VALUE_SLOTS).map(indicator_name));
    h
}

pub fn preview_record(a: &Attributes) -> Vec<String> {
    let mut rec = vec![
        a.d_date.clone().unwrap_or_default(),
        a.t_region.clone().unwrap_or_default(),
        a.t_city.clone().unwrap_or_default(),
        a.long.to_string(),
        a.lat.to_string(),
    ];
    rec.extend(a.indicators.iter().map(|v| v.to_string()));
    rec
}

pub fn write_features_json(path: impl AsRef<Path>, features: &[Feature]) -> Result<()> {
    let path = path.as_ref();
    let body = serde_json::to_vec_pretty(features).context("serializing features")?;
    fs::write(path, body).with_context(|| format!("writing {}", path.display()))
}

pub fn write_preview_csv(path: impl AsRef<Path>, features: &[Feature]) -> Result<()> {
    let header = preview_header();
    let header: Vec<&str> = header.iter().map(String::as_str).collect();
    write_csv_with_bom(
        path,
        &header,
        features.iter().map(|f| preview_record(&f.attributes)),
    )
}

/// Write `<base>.json`, `<base>_preview.csv` and `<base>.parquet` under `dir`.
#[instrument(level = "info", skip(features), fields(dir = %dir.as_ref().display(), features = features.len()))]
pub fn export_features(dir: impl AsRef<Path>, base: &str, features: &[Feature]) -> Result<ExportPaths> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir).with_context(|| format!("creating output dir {}", dir.display()))?;

    let json = dir.join(format!("{}.json", base));
    write_features_json(&json, features)?;

    let preview_csv = if features.is_empty() {
        None
    } else {
        let p = dir.join(format!("{}_preview.csv", base));
        write_preview_csv(&p, features)?;
        Some(p)
    };

    let parquet = dir.join(format!("{}.parquet", base));
    write_features_parquet(&parquet, features)?;

    info!(json = %json.display(), "exports written");
    Ok(ExportPaths {
        json,
        preview_csv,
        parquet,
    })
}

#[derive(Debug, Serialize)]
struct ErrorMeta<'a> {
    columns: &'a [String],
    error: String,
}

/// Snapshot of the header that failed resolution, for diagnosing the sheet.
pub fn write_error_meta(dir: impl AsRef<Path>, columns: &[String], error: &str) -> Result<PathBuf> {
    let dir = dir.as_ref();
    fs::create_dir_all(dir)?;
    let path = dir.join(ERROR_META_FILE);
    let meta = ErrorMeta {
        columns,
        error: error.to_string(),
    };
    let body = serde_json::to_vec_pretty(&meta)?;
    fs::write(&path, body).with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}

/// Read a JSON array of feature records back.
pub fn read_feature_records(path: impl AsRef<Path>) -> Result<Vec<crate::transform::FeatureRecord>> {
    let path = path.as_ref();
    let raw = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_slice(&raw).with_context(|| format!("parsing features from {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::csv::read_csv_file;
    use crate::table::Cell;

    fn feature(city: &str, first: u8) -> Feature {
        let mut indicators = [0; VALUE_SLOTS];
        indicators[0] = first;
        Feature {
            attributes: Attributes {
                d_date: Some("2025-10-17".into()),
                t_region: None,
                t_city: Some(city.into()),
                long: 12.34,
                lat: 56.78,
                indicators,
            },
        }
    }

    #[test]
    fn test_export_all_files() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let features = vec![feature("Київ", 1), feature("Київ", 0)];
        let paths = export_features(dir.path(), "prepared_features", &features)?;

        let records = read_feature_records(&paths.json)?;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].attr_str("t_city"), Some("Київ"));
        assert_eq!(records[1].wkt.as_deref(), Some("POINT(12.34 56.78)"));

        let preview = read_csv_file(paths.preview_csv.as_ref().unwrap())?;
        assert_eq!(preview.headers, preview_header());
        assert_eq!(preview.len(), 2);
        assert_eq!(preview.rows[0].get("i_value_1"), Some(&Cell::from("1")));
        assert_eq!(preview.rows[0].get("t_region"), Some(&Cell::Empty));
        assert_eq!(preview.rows[1].get("long"), Some(&Cell::from("12.34")));

        assert!(paths.parquet.exists());
        Ok(())
    }

    #[test]
    fn test_no_preview_without_features() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let paths = export_features(dir.path(), "empty", &[])?;
        assert_eq!(paths.preview_csv, None);
        assert_eq!(fs::read_to_string(&paths.json)?.trim(), "[]");
        assert!(!dir.path().join("empty_preview.csv").exists());
        Ok(())
    }

    #[test]
    fn test_error_meta() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let cols = vec!["Дата".to_string(), "long".to_string()];
        let path = write_error_meta(dir.path(), &cols, "could not detect column for Value 1")?;
        let v: serde_json::Value = serde_json::from_slice(&fs::read(path)?)?;
        assert_eq!(v["columns"][0], "Дата");
        assert!(v["error"].as_str().unwrap().contains("Value 1"));
        Ok(())
    }
}

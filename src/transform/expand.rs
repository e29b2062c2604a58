//! Row → features expansion.
//!
//! A row with value counts `c[0..10]` and `M = max(c)` becomes `M` features;
//! the `i`-th carries `i_value_{k+1} = 1` exactly when `c[k] > i`.

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, instrument};

use super::columns::{ColumnRoleMap, VALUE_SLOTS};
use super::date::normalize_date_cell;
use super::feature::{Attributes, Feature};
use super::number::{coordinate_from, count_from};
use crate::error::SchemaResolutionError;
use crate::table::{Cell, RawRow, RawTable};

/// A row with every role read and normalized.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRow {
    pub date: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
    pub longitude: Option<f64>,
    pub latitude: Option<f64>,
    pub counts: [u32; VALUE_SLOTS],
}

fn text_of(cell: Option<&Cell>) -> Option<String> {
    cell.and_then(|c| if c.is_empty() { None } else { c.as_text() })
}

impl NormalizedRow {
    pub fn from_row(row: &RawRow, roles: &ColumnRoleMap) -> Self {
        let counts = std::array::from_fn(|k| count_from(row.get(&roles.values[k])));
        Self {
            date: normalize_date_cell(row.get_opt(roles.date.as_deref())),
            region: text_of(row.get_opt(roles.region.as_deref())),
            city: text_of(row.get_opt(roles.city.as_deref())),
            longitude: coordinate_from(row.get_opt(roles.longitude.as_deref())),
            latitude: coordinate_from(row.get_opt(roles.latitude.as_deref())),
            counts,
        }
    }

    pub fn max_count(&self) -> u32 {
        self.counts.iter().copied().max().unwrap_or(0)
    }

    pub fn expand(&self) -> RowOutcome {
        let max_n = self.max_count();
        if max_n == 0 {
            return RowOutcome::ZeroCount;
        }
        let (long, lat) = match (self.longitude, self.latitude) {
            (Some(x), Some(y)) => (x, y),
            _ => return RowOutcome::BadGeometry,
        };
        let features = (0..max_n)
            .map(|i| Feature {
                attributes: Attributes {
                    d_date: self.date.clone(),
                    t_region: self.region.clone(),
                    t_city: self.city.clone(),
                    long,
                    lat,
                    indicators: std::array::from_fn(|k| u8::from(self.counts[k] > i)),
                },
            })
            .collect();
        RowOutcome::Expanded(features)
    }
}

/// What became of one row.
#[derive(Debug, Clone, PartialEq)]
pub enum RowOutcome {
    Expanded(Vec<Feature>),
    /// Every value count was zero.
    ZeroCount,
    /// Longitude or latitude missing or not numeric.
    BadGeometry,
}

impl RowOutcome {
    pub fn into_features(self) -> Vec<Feature> {
        match self {
            RowOutcome::Expanded(f) => f,
            _ => Vec::new(),
        }
    }
}

/// Expand one row. Bad rows give an empty vector, never an error.
pub fn expand(row: &RawRow, roles: &ColumnRoleMap) -> Vec<Feature> {
    NormalizedRow::from_row(row, roles).expand().into_features()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExpansionStats {
    pub rows_read: usize,
    pub rows_expanded: usize,
    pub skipped_zero_count: usize,
    pub skipped_bad_geometry: usize,
    pub features: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Expansion {
    pub roles: ColumnRoleMap,
    pub features: Vec<Feature>,
    pub stats: ExpansionStats,
}

impl Expansion {
    /// Attribute records in feature order, for previews.
    pub fn preview(&self, n: usize) -> impl Iterator<Item = &Attributes> {
        self.features.iter().take(n).map(|f| &f.attributes)
    }
}

/// Expand every row of a table whose roles are already resolved.
///
/// Rows are processed in parallel; feature blocks keep the row order.
pub fn expand_table(table: &RawTable, roles: &ColumnRoleMap) -> Expansion {
    let outcomes: Vec<RowOutcome> = table
        .rows
        .par_iter()
        .map(|row| NormalizedRow::from_row(row, roles).expand())
        .collect();

    let mut stats = ExpansionStats {
        rows_read: table.rows.len(),
        ..Default::default()
    };
    let mut features = Vec::new();
    for (idx, outcome) in outcomes.into_iter().enumerate() {
        match outcome {
            RowOutcome::Expanded(mut f) => {
                stats.rows_expanded += 1;
                features.append(&mut f);
            }
            RowOutcome::ZeroCount => {
                stats.skipped_zero_count += 1;
                debug!(row = idx, "skipping row: all value counts are zero");
            }
            RowOutcome::BadGeometry => {
                stats.skipped_bad_geometry += 1;
                debug!(row = idx, "skipping row: longitude/latitude missing or not numeric");
            }
        }
    }
    stats.features = features.len();

    Expansion {
        roles: roles.clone(),
        features,
        stats,
    }
}

/// Resolve the header, then expand. Resolution fails before any row is read.
#[instrument(level = "info", skip(table), fields(rows = table.rows.len()))]
pub fn prepare_features(table: &RawTable) -> Result<Expansion, SchemaResolutionError> {
    let roles = ColumnRoleMap::resolve(&table.headers)?;
    debug!(roles = ?roles, "columns resolved");
    let expansion = expand_table(table, &roles);
    let s = &expansion.stats;
    info!(
        rows_read = s.rows_read,
        rows_expanded = s.rows_expanded,
        skipped_zero_count = s.skipped_zero_count,
        skipped_bad_geometry = s.skipped_bad_geometry,
        features = s.features,
        "expansion finished"
    );
    Ok(expansion)
}

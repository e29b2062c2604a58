//! Row-to-feature transformation: column roles, locale number and date
//! normalization, and the expansion of one row into repeated point features.

pub mod clean;
pub mod columns;
pub mod date;
pub mod expand;
pub mod feature;
pub mod number;

pub use columns::{ColumnRoleMap, VALUE_SLOTS};
pub use expand::{expand, expand_table, prepare_features, Expansion, ExpansionStats, NormalizedRow};
pub use feature::{Attributes, Feature, FeatureRecord, PointGeometry};

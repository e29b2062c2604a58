use anyhow::{Context, Result};
use arrow::array::{ArrayRef, Float64Array, StringArray, UInt8Array};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use std::{fs::File, path::Path, sync::Arc};
use tracing::debug;

use crate::transform::feature::indicator_name;
use crate::transform::{Feature, VALUE_SLOTS};

/// Columnar layout of the feature attributes.
pub fn feature_schema() -> Schema {
    let mut fields = vec![
        Field::new("d_date", DataType::Utf8, true),
        Field::new("t_region", DataType::Utf8, true),
        Field::new("t_city", DataType::Utf8, true),
        Field::new("long", DataType::Float64, false),
        Field::new("lat", DataType::Float64, false),
    ];
    fields.extend((0..VALUE_SLOTS).map(|k| Field::new(indicator_name(k), DataType::UInt8, false)));
    Schema::new(fields)
}

pub fn features_to_batch(features: &[Feature]) -> Result<RecordBatch> {
    let schema = Arc::new(feature_schema());
    let text = |get: fn(&Feature) -> Option<&str>| -> ArrayRef {
        Arc::new(features.iter().map(get).collect::<StringArray>())
    };

    let mut columns: Vec<ArrayRef> = vec![
        text(|f| f.attributes.d_date.as_deref()),
        text(|f| f.attributes.t_region.as_deref()),
        text(|f| f.attributes.t_city.as_deref()),
        Arc::new(Float64Array::from_iter_values(
            features.iter().map(|f| f.attributes.long),
        )),
        Arc::new(Float64Array::from_iter_values(
            features.iter().map(|f| f.attributes.lat),
        )),
    ];
    for k in 0..VALUE_SLOTS {
        columns.push(Arc::new(UInt8Array::from_iter_values(
            features.iter().map(|f| f.attributes.indicators[k]),
        )));
    }

    RecordBatch::try_new(schema, columns).context("building feature record batch")
}

/// Snappy-compressed Parquet copy of the attributes.
pub fn write_features_parquet(path: impl AsRef<Path>, features: &[Feature]) -> Result<()> {
    let path = path.as_ref();
    let batch = features_to_batch(features)?;
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();
    let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))
        .context("creating Arrow writer for features")?;
    writer.write(&batch).context("writing feature batch")?;
    writer.close().context("closing feature writer")?;
    debug!(path = %path.display(), rows = features.len(), "parquet written");
    Ok(())
}

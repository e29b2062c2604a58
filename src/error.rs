use thiserror::Error;

/// A table whose header row does not carry one of the ten value columns.
///
/// This aborts the whole table: every row shares one header, so there is
/// nothing sensible to do per row.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("could not detect column for {role} (all value columns 1..10 are required). Available columns: {available:?}")]
pub struct SchemaResolutionError {
    /// Human readable role name, e.g. `Value 7`.
    pub role: String,
    /// Column labels as seen in the table, in table order.
    pub available: Vec<String>,
}

/// A downstream write/upload batch that failed after its retries.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{sink} batch {index} failed: {reason}")]
pub struct SinkBatchError {
    pub sink: String,
    pub index: usize,
    pub reason: String,
}

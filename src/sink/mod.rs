//! Destinations for expanded features.
//!
//! Batch sinks share one policy: batches run in order, the first failure stops
//! the run, and batches already written stay written.

pub mod arcgis;
pub mod export;
pub mod parquet;
pub mod postgis;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, instrument};

use crate::error::SinkBatchError;

/// Something that accepts features one batch at a time.
#[async_trait]
pub trait BatchSink: Sync {
    type Item: Sync;

    fn name(&self) -> &'static str;

    /// Write one batch. The returned value is kept in the report as the
    /// batch's response (server reply, row count, ...).
    async fn write_batch(&self, index: usize, batch: &[Self::Item]) -> anyhow::Result<Value>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchOutcome {
    pub index: usize,
    pub ok: bool,
    pub count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SinkReport {
    pub sink: String,
    pub success: bool,
    pub batches: Vec<BatchOutcome>,
}

impl SinkReport {
    pub fn new(sink: &str) -> Self {
        Self {
            sink: sink.to_string(),
            success: true,
            batches: Vec::new(),
        }
    }

    pub fn written(&self) -> usize {
        self.batches.iter().filter(|b| b.ok).map(|b| b.count).sum()
    }

    /// The batch that stopped the run, if any.
    pub fn failure(&self) -> Option<SinkBatchError> {
        self.batches.iter().find(|b| !b.ok).map(|b| SinkBatchError {
            sink: self.sink.clone(),
            index: b.index,
            reason: b.error.clone().unwrap_or_default(),
        })
    }
}

/// Feed `items` to `sink` in chunks of `batch_size` (at least 1).
#[instrument(level = "info", skip(sink, items), fields(sink = sink.name(), items = items.len()))]
pub async fn run_batches<S: BatchSink>(sink: &S, items: &[S::Item], batch_size: usize) -> SinkReport {
    let mut report = SinkReport::new(sink.name());
    for (index, chunk) in items.chunks(batch_size.max(1)).enumerate() {
        match sink.write_batch(index, chunk).await {
            Ok(response) => {
                info!(batch = index, count = chunk.len(), "batch written");
                report.batches.push(BatchOutcome {
                    index,
                    ok: true,
                    count: chunk.len(),
                    response: Some(response),
                    error: None,
                });
            }
            Err(e) => {
                error!(batch = index, error = %format!("{:#}", e), "batch failed, stopping");
                report.success = false;
                report.batches.push(BatchOutcome {
                    index,
                    ok: false,
                    count: chunk.len(),
                    response: None,
                    error: Some(format!("{:#}", e)),
                });
                break;
            }
        }
    }
    report
}

//! Batch upload of readings to the sink.

use std::collections::BTreeMap;
use std::sync::Arc;

use tempwatch_common::model::Reading;

use crate::sink::{SinkClient, SinkError};

/// Batch submission failed; the cycle's readings are dropped, not retried.
#[derive(Debug, thiserror::Error)]
#[error("reading upload failed: {0}")]
pub struct UploadError(#[from] pub SinkError);

/// Transforms a cycle's readings into sink rows and submits them.
pub struct Uploader {
    sink: Arc<SinkClient>,
}

impl Uploader {
    pub fn new(sink: Arc<SinkClient>) -> Self {
        Self { sink }
    }

    /// Submit one batch of readings captured at `timestamp`.
    ///
    /// Builds one row per entry, rounded to the sink's one-decimal
    /// precision, and returns how many were sent. An empty mapping is a
    /// no-op: no network call, count zero.
    pub async fn send(
        &self,
        host_id: &str,
        readings: &BTreeMap<String, f64>,
        timestamp: &str,
    ) -> Result<usize, UploadError> {
        if readings.is_empty() {
            return Ok(0);
        }

        let batch: Vec<Reading> = readings
            .iter()
            .map(|(name, value)| Reading::new(host_id, name, *value, timestamp))
            .collect();

        self.sink.insert_readings(&batch).await?;
        Ok(batch.len())
    }
}

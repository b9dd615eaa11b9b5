//! Common data types used across the data_capture subsystem.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{Number, Value};

/// One decoded broker payload.
///
/// Unknown fields are ignored. A field that is present but `null` is treated
/// the same as an absent one.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct InboundMessage {
    #[serde(default)]
    pub channel: Option<Value>,
    #[serde(default)]
    pub rssi: Option<Value>,
    #[serde(default)]
    pub sequence: Option<Value>,
    /// IQ samples in arrival order; absent means no trailing columns.
    #[serde(default)]
    pub samples: Vec<Number>,
}

/// A single column of an [`OutputRow`] after the timestamp.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    /// Placeholder keeping columns aligned when an optional field is missing.
    Empty,
    Scalar(Value),
    Sample(Number),
}

/// Row appended to the sink for one accepted message:
/// `[received_at, channel, rssi, sequence, samples...]`.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputRow {
    pub received_at: DateTime<Utc>,
    pub values: Vec<CellValue>,
}

impl OutputRow {
    /// Number of columns including the timestamp.
    pub fn width(&self) -> usize {
        self.values.len() + 1
    }
}

//! Message-to-row transformation.
//!
//! Column order is fixed: receive timestamp, `channel`, `rssi`, `sequence`,
//! then every sample. Missing scalars become [`CellValue::Empty`] so the first
//! four columns always line up; the row width varies with the sample count.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value;

use super::types::{CellValue, InboundMessage, OutputRow};
use crate::configuration::types::TimestampFormat;

/// Builds the row for `message` received at `received_at`.
pub fn encode_row(received_at: DateTime<Utc>, message: InboundMessage) -> OutputRow {
    let mut values = Vec::with_capacity(3 + message.samples.len());
    for field in [message.channel, message.rssi, message.sequence] {
        values.push(match field {
            Some(Value::Null) | None => CellValue::Empty,
            Some(value) => CellValue::Scalar(value),
        });
    }
    values.extend(message.samples.into_iter().map(CellValue::Sample));

    OutputRow {
        received_at,
        values,
    }
}

/// Renders a row as the text fields written to the sink.
pub fn render_record(row: &OutputRow, format: TimestampFormat) -> Vec<String> {
    let mut record = Vec::with_capacity(row.width());
    record.push(render_timestamp(row.received_at, format));
    record.extend(row.values.iter().map(render_cell));
    record
}

pub fn render_timestamp(ts: DateTime<Utc>, format: TimestampFormat) -> String {
    match format {
        TimestampFormat::EpochSeconds => {
            format!("{}.{:06}", ts.timestamp(), ts.timestamp_subsec_micros())
        }
        TimestampFormat::Rfc3339 => ts.to_rfc3339_opts(SecondsFormat::Micros, true),
    }
}

fn render_cell(cell: &CellValue) -> String {
    match cell {
        CellValue::Empty => String::new(),
        CellValue::Sample(n) => n.to_string(),
        CellValue::Scalar(Value::String(s)) => s.clone(),
        CellValue::Scalar(Value::Null) => String::new(),
        // numbers, booleans and nested values use their JSON spelling
        CellValue::Scalar(other) => other.to_string(),
    }
}

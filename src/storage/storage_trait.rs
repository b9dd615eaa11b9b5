//! Sink Trait
//!
//! This module defines the `RowSink` trait, the contract every row
//! destination implements.
//!
//! Implementors are responsible for:
//! - Serializing concurrent appends so rows are never interleaved
//! - Making each append all-or-nothing for that row
//! - Never truncating data written by earlier appends

use crate::data_capture::types::OutputRow;
use crate::error_handling::types::StorageError;

/// Append-only destination for [`OutputRow`]s.
pub trait RowSink: Send + Sync {
    /// Appends one row.
    ///
    /// - `row` - The row to persist, rendered by the sink's own format.
    fn append(&self, row: &OutputRow) -> Result<(), StorageError>;

    /// Human-readable location for log lines.
    fn describe(&self) -> String;
}

//! Storage subsystem
//!
//! This module provides the sink abstraction rows are persisted through.
//!
//! Components:
//! - `storage_trait`: the `RowSink` trait defining the append contract.
//! - `file_storage`: CSV file implementation used by the ingest loop.

pub mod file_storage;
pub mod storage_trait;

pub use file_storage::FileStorage;
pub use storage_trait::RowSink;

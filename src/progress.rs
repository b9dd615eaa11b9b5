//! Progress reporting: counters and timestamps of the ingest session,
//! exposed as pull-based snapshots.

pub mod metrics;
pub mod reporter;

pub use metrics::{IngestMetrics, MetricsSnapshot};
pub use reporter::{ProgressReporter, SessionSnapshot};

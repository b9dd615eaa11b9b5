pub mod ingest_loop;

pub use ingest_loop::{IngestLoop, MessageOutcome, SinkOpener};

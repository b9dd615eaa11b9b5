//! Configuration publisher: typed payload building and one-shot publish to
//! device configuration topics.

pub mod config_publisher;
pub mod field_types;

pub use config_publisher::ConfigPublisher;
pub use field_types::{build_payload, resolve_topic, FieldType};

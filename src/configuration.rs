pub mod config;
pub mod types;

pub use config::{Config, ConfigArgs, SessionArgs};
pub use types::{SessionConfig, TimestampFormat};

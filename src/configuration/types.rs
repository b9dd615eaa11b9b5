use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error_handling::types::ConfigError;

/// How the receive timestamp is written in the first column of every row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampFormat {
    /// Fractional seconds since the Unix epoch, microsecond precision.
    #[default]
    EpochSeconds,
    /// RFC 3339 with microseconds, always UTC.
    Rfc3339,
}

/// Immutable description of one ingest session.
///
/// Built (and validated) by the configuration provider before
/// `IngestLoop::start` is called; never mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    broker_host: String,
    broker_port: u16,
    topic: String,
    sink_path: PathBuf,
    measurement_limit: u64,
    timestamp_format: TimestampFormat,
}

impl SessionConfig {
    /// Validates every field and builds the config.
    ///
    /// A `measurement_limit` of `0` means the session never stops on its own.
    pub fn new(
        broker_host: impl Into<String>,
        broker_port: u16,
        topic: impl Into<String>,
        sink_path: impl Into<PathBuf>,
        measurement_limit: u64,
    ) -> Result<Self, ConfigError> {
        let config = Self {
            broker_host: broker_host.into().trim().to_string(),
            broker_port,
            topic: topic.into(),
            sink_path: sink_path.into(),
            measurement_limit,
            timestamp_format: TimestampFormat::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_timestamp_format(mut self, format: TimestampFormat) -> Self {
        self.timestamp_format = format;
        self
    }

    /// Re-checks the invariants; `IngestLoop::start` calls this before touching
    /// the broker.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker_host.is_empty() {
            return Err(ConfigError::MissingField("broker host".to_string()));
        }
        if self.broker_port == 0 {
            return Err(ConfigError::BadPortsRange(
                "broker port must be within 1-65535".to_string(),
            ));
        }
        validate_topic_filter(&self.topic)?;
        if self.sink_path.as_os_str().is_empty() {
            return Err(ConfigError::MissingField("sink path".to_string()));
        }
        Ok(())
    }

    pub fn broker_host(&self) -> &str {
        &self.broker_host
    }

    pub fn broker_port(&self) -> u16 {
        self.broker_port
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn sink_path(&self) -> &Path {
        &self.sink_path
    }

    pub fn measurement_limit(&self) -> u64 {
        self.measurement_limit
    }

    pub fn timestamp_format(&self) -> TimestampFormat {
        self.timestamp_format
    }
}

/// Checks MQTT topic filter syntax: `#` may only be the last level and `+`
/// must occupy a whole level.
pub fn validate_topic_filter(topic: &str) -> Result<(), ConfigError> {
    if topic.is_empty() {
        return Err(ConfigError::MissingField("topic".to_string()));
    }
    if topic.contains('\0') {
        return Err(ConfigError::InvalidTopic(format!(
            "{:?} contains a NUL character",
            topic
        )));
    }

    let levels: Vec<&str> = topic.split('/').collect();
    for (i, level) in levels.iter().enumerate() {
        if level.contains('#') && (*level != "#" || i != levels.len() - 1) {
            return Err(ConfigError::InvalidTopic(format!(
                "{:?}: '#' must be the whole last level",
                topic
            )));
        }
        if level.contains('+') && *level != "+" {
            return Err(ConfigError::InvalidTopic(format!(
                "{:?}: '+' must occupy a whole level",
                topic
            )));
        }
    }
    Ok(())
}

/// `[broker]` section of the configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerSettings {
    pub host: String,
    pub port: u16,
    pub keep_alive_secs: u64,
    pub connect_timeout_secs: u64,
    pub client_id_prefix: String,
    /// Capacity of the queue between the transport and the receive task.
    pub channel_capacity: usize,
    pub reconnect_delay_ms: u64,
    /// Largest MQTT packet accepted or sent, in bytes.
    pub max_packet_size: usize,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            keep_alive_secs: 60,
            connect_timeout_secs: 5,
            client_id_prefix: "telemetry-ingest".to_string(),
            channel_capacity: 256,
            reconnect_delay_ms: 1000,
            max_packet_size: 1024 * 1024,
        }
    }
}

/// `[session]` section of the configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    pub topic: String,
    pub sink_path: PathBuf,
    pub measurement_limit: u64,
    pub timestamp_format: TimestampFormat,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            topic: String::new(),
            sink_path: PathBuf::from("data.csv"),
            measurement_limit: 0,
            timestamp_format: TimestampFormat::default(),
        }
    }
}

/// `[progress]` section of the configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressSettings {
    pub interval_secs: u64,
}

impl Default for ProgressSettings {
    fn default() -> Self {
        Self { interval_secs: 1 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_wildcard_topics() {
        assert!(validate_topic_filter("silabs/aoa/iq_report/+/+").is_ok());
        assert!(validate_topic_filter("t/#").is_ok());
        assert!(validate_topic_filter("#").is_ok());
        assert!(validate_topic_filter("t/x").is_ok());
    }

    #[test]
    fn rejects_misplaced_wildcards() {
        assert!(matches!(
            validate_topic_filter("t/#/x"),
            Err(ConfigError::InvalidTopic(_))
        ));
        assert!(matches!(
            validate_topic_filter("t/a+"),
            Err(ConfigError::InvalidTopic(_))
        ));
        assert!(matches!(
            validate_topic_filter(""),
            Err(ConfigError::MissingField(_))
        ));
    }

    #[test]
    fn session_config_rejects_missing_fields() {
        assert!(matches!(
            SessionConfig::new("  ", 1883, "t/x", "out.csv", 0),
            Err(ConfigError::MissingField(_))
        ));
        assert!(matches!(
            SessionConfig::new("localhost", 0, "t/x", "out.csv", 0),
            Err(ConfigError::BadPortsRange(_))
        ));
        assert!(matches!(
            SessionConfig::new("localhost", 1883, "t/x", "", 0),
            Err(ConfigError::MissingField(_))
        ));
    }

    #[test]
    fn session_config_keeps_values() {
        let config = SessionConfig::new("localhost", 1883, "t/x", "out.csv", 3)
            .unwrap()
            .with_timestamp_format(TimestampFormat::Rfc3339);
        assert_eq!(config.broker_host(), "localhost");
        assert_eq!(config.broker_port(), 1883);
        assert_eq!(config.topic(), "t/x");
        assert_eq!(config.sink_path(), Path::new("out.csv"));
        assert_eq!(config.measurement_limit(), 3);
        assert_eq!(config.timestamp_format(), TimestampFormat::Rfc3339);
    }
}

use super::types::*;
use crate::error_handling::types::ConfigError;
use clap::Args;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Application configuration loaded from a TOML file.
///
/// Every section is optional; missing sections and keys fall back to the
/// defaults of the receiver tool (`localhost:1883`, `data.csv`, no limit).
///
/// # Examples
///
/// ```
/// use telemetry_ingest::configuration::config::Config;
///
/// let config = Config::from_toml_str(r#"
///     [broker]
///     host = "10.0.0.2"
///
///     [session]
///     topic = "silabs/aoa/iq_report/+/+"
///     measurement_limit = 100
/// "#).unwrap();
///
/// let session = config.session_config().unwrap();
/// assert_eq!(session.broker_port(), 1883);
/// assert_eq!(session.measurement_limit(), 100);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub broker: BrokerSettings,
    pub session: SessionSettings,
    pub progress: ProgressSettings,
}

/// Command-line flags shared by every subcommand.
///
/// Values given here win over the configuration file.
#[derive(Args, Debug, Clone, Default)]
pub struct ConfigArgs {
    /// Path of the TOML configuration file
    #[arg(long, env = "TELEMETRY_INGEST_CONFIG")]
    pub config: Option<PathBuf>,

    /// Broker host name or address
    #[arg(long)]
    pub broker_host: Option<String>,

    /// Broker TCP port
    #[arg(long)]
    pub broker_port: Option<u16>,

    /// Topic filter to subscribe to (or publish on)
    #[arg(long)]
    pub topic: Option<String>,
}

/// Flags only meaningful when receiving.
#[derive(Args, Debug, Clone, Default)]
pub struct SessionArgs {
    /// CSV file rows are appended to
    #[arg(long)]
    pub sink_path: Option<PathBuf>,

    /// Stop after this many persisted messages, `0` means unlimited
    #[arg(long)]
    pub limit: Option<u64>,

    /// Format of the first column
    #[arg(long, value_enum)]
    pub timestamp_format: Option<TimestampFormatArg>,
}

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampFormatArg {
    EpochSeconds,
    Rfc3339,
}

impl From<TimestampFormatArg> for TimestampFormat {
    fn from(arg: TimestampFormatArg) -> Self {
        match arg {
            TimestampFormatArg::EpochSeconds => TimestampFormat::EpochSeconds,
            TimestampFormatArg::Rfc3339 => TimestampFormat::Rfc3339,
        }
    }
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        info!("Loading configuration from {}", path.display());
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::TomlError(e.to_string()))
    }

    /// Loads the file named by `args` (if any) and applies the flag overrides.
    pub fn load(args: &ConfigArgs) -> Result<Self, ConfigError> {
        let mut config = match &args.config {
            Some(path) => Self::from_file(path)?,
            None => {
                debug!("No configuration file given, using defaults");
                Self::default()
            }
        };
        config.apply_args(args);
        Ok(config)
    }

    pub fn apply_args(&mut self, args: &ConfigArgs) {
        if let Some(host) = &args.broker_host {
            self.broker.host = host.clone();
        }
        if let Some(port) = args.broker_port {
            self.broker.port = port;
        }
        if let Some(topic) = &args.topic {
            self.session.topic = topic.clone();
        }
    }

    pub fn apply_session_args(&mut self, args: &SessionArgs) {
        if let Some(path) = &args.sink_path {
            self.session.sink_path = path.clone();
        }
        if let Some(limit) = args.limit {
            self.session.measurement_limit = limit;
        }
        if let Some(format) = args.timestamp_format {
            self.session.timestamp_format = format.into();
        }
    }

    /// Produces the validated, immutable session description.
    pub fn session_config(&self) -> Result<SessionConfig, ConfigError> {
        Ok(SessionConfig::new(
            self.broker.host.clone(),
            self.broker.port,
            self.session.topic.clone(),
            self.session.sink_path.clone(),
            self.session.measurement_limit,
        )?
        .with_timestamp_format(self.session.timestamp_format))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        config: ConfigArgs,
        #[command(flatten)]
        session: SessionArgs,
    }

    #[test]
    fn defaults_match_receiver_tool() {
        let config = Config::default();
        assert_eq!(config.broker.host, "localhost");
        assert_eq!(config.broker.port, 1883);
        assert_eq!(config.session.sink_path, PathBuf::from("data.csv"));
        assert_eq!(config.session.measurement_limit, 0);
        assert_eq!(config.session.timestamp_format, TimestampFormat::EpochSeconds);
    }

    #[test]
    fn parses_partial_file() {
        let config = Config::from_toml_str(
            r#"
            [session]
            topic = "t/x"
            sink_path = "out.csv"
            measurement_limit = 3
            timestamp_format = "rfc3339"
            "#,
        )
        .unwrap();
        assert_eq!(config.broker, BrokerSettings::default());
        assert_eq!(config.session.topic, "t/x");
        assert_eq!(config.session.timestamp_format, TimestampFormat::Rfc3339);
        assert_eq!(config.progress.interval_secs, 1);
    }

    #[test]
    fn rejects_bad_toml() {
        let err = Config::from_toml_str("[broker\nhost=").unwrap_err();
        assert!(matches!(err, ConfigError::TomlError(_)));
    }

    #[test]
    fn session_config_requires_topic() {
        let err = Config::default().session_config().unwrap_err();
        assert!(matches!(err, ConfigError::MissingField(_)));
    }

    #[test]
    #[serial]
    fn flags_override_file_from_env() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[broker]\nhost = \"broker.local\"\nport = 1884\n[session]\ntopic = \"a/b\"\nmeasurement_limit = 10"
        )
        .unwrap();

        std::env::set_var("TELEMETRY_INGEST_CONFIG", file.path());
        let cli = TestCli::try_parse_from(["telemetry-ingest", "--broker-port", "1999", "--limit", "2"])
            .unwrap();
        std::env::remove_var("TELEMETRY_INGEST_CONFIG");

        let mut config = Config::load(&cli.config).unwrap();
        config.apply_session_args(&cli.session);
        let session = config.session_config().unwrap();

        assert_eq!(session.broker_host(), "broker.local");
        assert_eq!(session.broker_port(), 1999);
        assert_eq!(session.topic(), "a/b");
        assert_eq!(session.measurement_limit(), 2);
    }

    #[test]
    #[serial]
    fn missing_file_is_io_error() {
        std::env::remove_var("TELEMETRY_INGEST_CONFIG");
        let cli = TestCli::try_parse_from([
            "telemetry-ingest",
            "--config",
            "/nonexistent/telemetry-ingest.toml",
        ])
        .unwrap();
        assert!(matches!(
            Config::load(&cli.config),
            Err(ConfigError::IoError(_))
        ));
    }
}

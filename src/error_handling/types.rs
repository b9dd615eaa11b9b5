use std::fmt;

#[derive(Debug)]
pub enum ConfigError {
    IoError(std::io::Error),
    TomlError(String),
    MissingField(String),
    BadPortsRange(String),
    InvalidTopic(String),
    InvalidValue(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::TomlError(e) => write!(f, "TOML parsing error: {}", e),
            ConfigError::MissingField(e) => write!(f, "Missing required field: {}", e),
            ConfigError::BadPortsRange(e) => write!(f, "Port range error: {}", e),
            ConfigError::InvalidTopic(e) => write!(f, "Invalid topic: {}", e),
            ConfigError::InvalidValue(e) => write!(f, "Invalid value: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::IoError(err)
    }
}

#[derive(Debug)]
pub enum ConnectionError {
    Unreachable(String),
    Refused(String),
    Timeout(String),
    SubscribeFailed(String),
    PublishFailed(String),
    Closed,
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionError::Unreachable(e) => write!(f, "Broker unreachable: {}", e),
            ConnectionError::Refused(e) => write!(f, "Broker refused connection: {}", e),
            ConnectionError::Timeout(e) => write!(f, "Broker connection timed out: {}", e),
            ConnectionError::SubscribeFailed(e) => write!(f, "Subscribe failed: {}", e),
            ConnectionError::PublishFailed(e) => write!(f, "Publish failed: {}", e),
            ConnectionError::Closed => write!(f, "Broker connection closed"),
        }
    }
}

impl std::error::Error for ConnectionError {}

#[derive(Debug)]
pub enum DecodeError {
    InvalidUtf8(std::str::Utf8Error),
    Malformed(serde_json::Error),
    NotAnObject,
    InvalidSamples(String),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::InvalidUtf8(e) => write!(f, "Payload is not valid UTF-8: {}", e),
            DecodeError::Malformed(e) => write!(f, "Payload is not valid JSON: {}", e),
            DecodeError::NotAnObject => write!(f, "Payload is not a JSON object"),
            DecodeError::InvalidSamples(e) => write!(f, "Invalid samples field: {}", e),
        }
    }
}

impl std::error::Error for DecodeError {}

#[derive(Debug)]
pub enum StorageError {
    OpenFailed(std::io::Error),
    WriteFailed(std::io::Error),
    EncodeFailed(String),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageError::OpenFailed(e) => write!(f, "Storage open failed: {}", e),
            StorageError::WriteFailed(e) => write!(f, "Storage write failed: {}", e),
            StorageError::EncodeFailed(e) => write!(f, "Row encoding failed: {}", e),
        }
    }
}

impl std::error::Error for StorageError {}

#[derive(Debug, PartialEq, Eq)]
pub enum SessionError {
    AlreadyActive,
    NotReceiving,
    /// `stop` was called while `start` was still connecting.
    StartCancelled,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::AlreadyActive => write!(f, "Session already active"),
            SessionError::NotReceiving => write!(f, "No session is receiving"),
            SessionError::StartCancelled => write!(f, "Session start cancelled by stop"),
        }
    }
}

impl std::error::Error for SessionError {}

#[derive(Debug)]
pub enum IngestError {
    Config(ConfigError),
    Connection(ConnectionError),
    Storage(StorageError),
    Session(SessionError),
}

impl fmt::Display for IngestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IngestError::Config(e) => write!(f, "Configuration error: {}", e),
            IngestError::Connection(e) => write!(f, "Connection error: {}", e),
            IngestError::Storage(e) => write!(f, "Storage error: {}", e),
            IngestError::Session(e) => write!(f, "Session error: {}", e),
        }
    }
}

impl std::error::Error for IngestError {}

impl From<ConfigError> for IngestError {
    fn from(err: ConfigError) -> Self {
        IngestError::Config(err)
    }
}

impl From<ConnectionError> for IngestError {
    fn from(err: ConnectionError) -> Self {
        IngestError::Connection(err)
    }
}

impl From<StorageError> for IngestError {
    fn from(err: StorageError) -> Self {
        IngestError::Storage(err)
    }
}

impl From<SessionError> for IngestError {
    fn from(err: SessionError) -> Self {
        IngestError::Session(err)
    }
}

#[derive(Debug)]
pub enum PublishError {
    InvalidField { name: String, reason: String },
    UnknownPlaceholder(String),
    Connection(ConnectionError),
}

impl fmt::Display for PublishError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishError::InvalidField { name, reason } => {
                write!(f, "Invalid value for {}: {}", name, reason)
            }
            PublishError::UnknownPlaceholder(e) => write!(f, "Unknown topic placeholder: <{}>", e),
            PublishError::Connection(e) => write!(f, "Publish connection error: {}", e),
        }
    }
}

impl std::error::Error for PublishError {}

impl From<ConnectionError> for PublishError {
    fn from(err: ConnectionError) -> Self {
        PublishError::Connection(err)
    }
}

//! Error taxonomy shared by every subsystem.
//!
//! Synchronous failures (`ConfigError`, `ConnectionError`, `SessionError`) are
//! returned to the caller of `IngestLoop::start`. Per-message failures
//! (`DecodeError`, `StorageError`) are logged and counted by the receive task
//! and never end a session.

pub mod types;

pub mod configuration;
pub mod controller;
pub mod data_capture;
pub mod error_handling;
pub mod network;
pub mod progress;
pub mod publisher;
pub mod session_management;
pub mod storage;

pub use configuration::{Config, SessionConfig};
pub use controller::IngestLoop;
pub use progress::{ProgressReporter, SessionSnapshot};
pub use session_management::SessionPhase;

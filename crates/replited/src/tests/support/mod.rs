//! Shared collaborators for the behavioural suites.

mod client;
mod config_loader;
mod reporter;

pub(crate) use self::client::TestClient;
pub(crate) use self::config_loader::{FailingConfigLoader, TestConfigLoader};
pub(crate) use self::reporter::{HealthEvent, RecordingHealthReporter};

//! Shared configuration for the replite server.
//!
//! Values are layered by [`ortho_config`]: built-in defaults, then a TOML file
//! named by `--config-path` (or `REPLITE_CONFIG_PATH`), then `REPLITE_*`
//! environment variables, then command-line flags.

mod defaults;
mod logging;
mod socket;

use std::time::Duration;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::{Deserialize, Serialize};

pub use defaults::{
    DEFAULT_HEARTBEAT_TIMEOUT_MS, DEFAULT_LOG_FILTER, DEFAULT_MAX_FRAME_BYTES, DEFAULT_REPLICATION,
    DEFAULT_TCP_PORT, default_data_dir, default_log_filter, default_log_filter_string,
    default_log_format, default_socket_endpoint,
};
pub use logging::{LogFormat, LogFormatParseError};
pub use socket::{SocketEndpoint, SocketParseError, SocketPreparationError};

/// Resolved server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, OrthoConfig)]
#[ortho_config(prefix = "REPLITE")]
pub struct Config {
    /// Endpoint the server listens on for client connections.
    #[ortho_config(default = default_socket_endpoint())]
    pub listen: SocketEndpoint,
    /// `tracing` filter expression applied to log output.
    #[ortho_config(default = default_log_filter_string())]
    pub log_filter: String,
    /// Output format for log lines.
    #[ortho_config(default = default_log_format())]
    pub log_format: LogFormat,
    /// Milliseconds of client silence tolerated before a connection is aborted.
    #[ortho_config(default = DEFAULT_HEARTBEAT_TIMEOUT_MS)]
    pub heartbeat_timeout_ms: u64,
    /// Largest request payload accepted, in bytes.
    #[ortho_config(default = DEFAULT_MAX_FRAME_BYTES)]
    pub max_frame_bytes: u32,
    /// Name the built-in local replication backend is registered under.
    #[ortho_config(default = DEFAULT_REPLICATION.to_owned())]
    pub replication: String,
    /// Directory holding database files for the local replication backend.
    #[ortho_config(default = default_data_dir())]
    pub data_dir: Utf8PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_socket_endpoint(),
            log_filter: default_log_filter_string(),
            log_format: default_log_format(),
            heartbeat_timeout_ms: DEFAULT_HEARTBEAT_TIMEOUT_MS,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            replication: DEFAULT_REPLICATION.to_owned(),
            data_dir: default_data_dir(),
        }
    }
}

impl Config {
    /// Endpoint the server binds.
    #[must_use]
    pub fn listen(&self) -> &SocketEndpoint {
        &self.listen
    }

    /// Log filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Log output format.
    #[must_use]
    pub fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Liveness window for idle connections.
    #[must_use]
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    /// Maximum accepted request payload length.
    #[must_use]
    pub fn max_frame_bytes(&self) -> u32 {
        self.max_frame_bytes
    }

    /// Name of the replication backend used for new databases.
    #[must_use]
    pub fn replication(&self) -> &str {
        &self.replication
    }

    /// Data directory for the local backend.
    #[must_use]
    pub fn data_dir(&self) -> &Utf8PathBuf {
        &self.data_dir
    }
}

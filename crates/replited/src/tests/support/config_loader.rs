//! Configuration loaders backed by temporary directories.

use std::ffi::OsString;
use std::sync::Arc;
use std::time::Duration;

use camino::Utf8PathBuf;
use ortho_config::{OrthoConfig, OrthoError};
use tempfile::TempDir;

use replite_config::{Config, SocketEndpoint};

use crate::bootstrap::ConfigLoader;

/// Loader placing the data directory under a temporary directory and
/// listening on an ephemeral TCP port.
pub(crate) struct TestConfigLoader {
    dir: TempDir,
    heartbeat_timeout: Duration,
    max_frame_bytes: u32,
}

impl TestConfigLoader {
    pub(crate) fn new() -> Self {
        Self {
            dir: TempDir::new().expect("failed to create temporary directory"),
            heartbeat_timeout: Duration::from_secs(5),
            max_frame_bytes: 64 * 1024,
        }
    }

    pub(crate) fn with_heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = timeout;
        self
    }

    pub(crate) fn with_max_frame_bytes(mut self, max_frame_bytes: u32) -> Self {
        self.max_frame_bytes = max_frame_bytes;
        self
    }

    pub(crate) fn data_dir(&self) -> Utf8PathBuf {
        let path = self.dir.path().join("data");
        Utf8PathBuf::from_path_buf(path).expect("temporary path was not valid UTF-8")
    }
}

impl ConfigLoader for TestConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Ok(Config {
            listen: SocketEndpoint::tcp("127.0.0.1", 0),
            heartbeat_timeout_ms: u64::try_from(self.heartbeat_timeout.as_millis())
                .expect("timeout fits u64"),
            max_frame_bytes: self.max_frame_bytes,
            data_dir: self.data_dir(),
            ..Config::default()
        })
    }
}

/// Loader that fails by passing an invalid endpoint on the command line.
pub(crate) struct FailingConfigLoader;

impl ConfigLoader for FailingConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        let args = vec![
            OsString::from("replited"),
            OsString::from("--listen"),
            OsString::from("invalid://socket"),
        ];
        Config::load_from_iter(args)
    }
}

use std::ffi::{OsStr, OsString};
use std::fs;
use std::sync::{Mutex, MutexGuard};

use once_cell::sync::Lazy;
use ortho_config::OrthoConfig;
use rstest::{fixture, rstest};
use tempfile::TempDir;

use replite_config::{Config, DEFAULT_HEARTBEAT_TIMEOUT_MS, LogFormat, SocketEndpoint};

static ENV_MUTEX: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

struct EnvOverride {
    key: &'static str,
    previous: Option<OsString>,
    _guard: MutexGuard<'static, ()>,
}

impl EnvOverride {
    fn set_var(key: &'static str, value: &OsStr) -> Self {
        let guard = ENV_MUTEX.lock().expect("env mutex poisoned");
        let previous = std::env::var_os(key);
        unsafe { std::env::set_var(key, value) };
        Self {
            key,
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvOverride {
    fn drop(&mut self) {
        match self.previous.take() {
            Some(value) => unsafe { std::env::set_var(self.key, value) },
            None => unsafe { std::env::remove_var(self.key) },
        }
    }
}

#[fixture]
fn config_dir() -> TempDir {
    TempDir::new().expect("create temp dir")
}

fn args(extra: &[&str]) -> Vec<OsString> {
    std::iter::once("replited")
        .chain(extra.iter().copied())
        .map(OsString::from)
        .collect()
}

#[rstest]
fn defaults_apply_without_overrides() {
    let _guard = ENV_MUTEX.lock().expect("env mutex poisoned");
    let config = Config::load_from_iter(args(&[])).expect("defaults should load");
    assert_eq!(config.heartbeat_timeout_ms, DEFAULT_HEARTBEAT_TIMEOUT_MS);
    assert_eq!(config.replication(), "local");
}

#[rstest]
fn cli_flags_override_defaults() {
    let _guard = ENV_MUTEX.lock().expect("env mutex poisoned");
    let config = Config::load_from_iter(args(&[
        "--listen",
        "tcp://127.0.0.1:7001",
        "--log-format",
        "compact",
        "--heartbeat-timeout-ms",
        "250",
    ]))
    .expect("cli overrides should load");
    assert_eq!(config.listen(), &SocketEndpoint::tcp("127.0.0.1", 7001));
    assert_eq!(config.log_format(), LogFormat::Compact);
    assert_eq!(config.heartbeat_timeout_ms, 250);
}

#[rstest]
fn environment_overrides_configuration_file(config_dir: TempDir) {
    let path = config_dir.path().join("replite.toml");
    fs::write(
        &path,
        "max_frame_bytes = 2048\nreplication = \"from-file\"\n",
    )
    .expect("write config file");

    let _env = EnvOverride::set_var("REPLITE_REPLICATION", OsStr::new("from-env"));
    let config = Config::load_from_iter(vec![
        OsString::from("replited"),
        OsString::from("--config-path"),
        path.into_os_string(),
    ])
    .expect("layered config should load");

    assert_eq!(config.max_frame_bytes(), 2048);
    assert_eq!(config.replication(), "from-env");
}

#[rstest]
fn invalid_listen_endpoint_is_rejected() {
    let _guard = ENV_MUTEX.lock().expect("env mutex poisoned");
    let result = Config::load_from_iter(args(&["--listen", "invalid://socket"]));
    assert!(result.is_err(), "unsupported scheme should fail to load");
}

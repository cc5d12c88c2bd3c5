//! Log output for the server process.
//!
//! Every connection is served on the listener's event loop thread, so log
//! lines carry the thread name to tell that loop apart from the main thread
//! waiting for signals. Targets are the crate name plus a component suffix,
//! such as `replited::connection`; `log_filter` directives match on those.

use std::io::{self, IsTerminal};

use once_cell::sync::OnceCell;
use tracing::{Subscriber, subscriber::SetGlobalDefaultError};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;

use replite_config::{Config, LogFormat};

static INSTALLED: OnceCell<LogFormat> = OnceCell::new();

/// Proof that the global subscriber is installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TelemetryHandle {
    format: LogFormat,
}

impl TelemetryHandle {
    /// Format of the installed subscriber.
    ///
    /// Only the first bootstrap in a process installs a subscriber, so a later
    /// one asking for another format still reports the first.
    #[must_use]
    pub fn format(&self) -> LogFormat {
        self.format
    }
}

/// Errors encountered while configuring telemetry.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// The configured log filter expression did not parse.
    #[error("invalid log filter '{filter}': {message}")]
    Filter { filter: String, message: String },
    /// Another global subscriber was already installed.
    #[error("failed to install telemetry subscriber: {0}")]
    Subscriber(#[source] SetGlobalDefaultError),
}

/// Installs the global subscriber on first use.
///
/// The filter in `config` is validated on every call, so a bad
/// `log_filter` fails bootstrap even when logging is already running.
pub fn initialise(config: &Config) -> Result<TelemetryHandle, TelemetryError> {
    let filter = parse_filter(config.log_filter())?;
    INSTALLED
        .get_or_try_init(|| install_subscriber(filter, config.log_format()))
        .map(|format| TelemetryHandle { format: *format })
}

fn parse_filter(directives: &str) -> Result<EnvFilter, TelemetryError> {
    EnvFilter::try_new(directives).map_err(|error| TelemetryError::Filter {
        filter: directives.to_owned(),
        message: error.to_string(),
    })
}

fn install_subscriber(filter: EnvFilter, format: LogFormat) -> Result<LogFormat, TelemetryError> {
    let builder = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(true)
        .with_writer(io::stderr)
        .with_ansi(io::stderr().is_terminal())
        .with_timer(fmt::time::UtcTime::rfc_3339());

    let subscriber: Box<dyn Subscriber + Send + Sync> = match format {
        LogFormat::Json => Box::new(builder.json().flatten_event(true).finish()),
        LogFormat::Compact => Box::new(builder.compact().finish()),
    };
    tracing::subscriber::set_global_default(subscriber).map_err(TelemetryError::Subscriber)?;
    Ok(format)
}

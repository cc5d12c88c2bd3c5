//! Foreground process supervision: start serving, wait for a signal, drain.

use std::io;
use std::sync::Arc;

use signal_hook::consts::signal::{SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::Signals;
use thiserror::Error;
use tracing::info;

use crate::bootstrap::{BootstrapError, ConfigLoader, SystemConfigLoader, bootstrap_with};
use crate::health::{HealthReporter, StructuredHealthReporter};
use crate::transport::ListenerError;

const PROCESS_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::process");

/// Abstraction over shutdown notification mechanisms.
pub trait ShutdownSignal: Send + Sync {
    /// Blocks until shutdown should proceed.
    fn wait(&self) -> Result<(), ShutdownError>;
}

/// Errors reported by shutdown signal listeners.
#[derive(Debug, Error)]
pub enum ShutdownError {
    /// Installing signal handlers failed.
    #[error("failed to install signal handlers: {source}")]
    Install {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Shutdown listener that waits for a termination signal.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemShutdownSignal;

impl ShutdownSignal for SystemShutdownSignal {
    fn wait(&self) -> Result<(), ShutdownError> {
        let mut signals = Signals::new([SIGTERM, SIGINT, SIGQUIT])
            .map_err(|source| ShutdownError::Install { source })?;
        if let Some(signal) = signals.forever().next() {
            info!(target: PROCESS_TARGET, signal, "shutdown signal received");
        }
        Ok(())
    }
}

/// Errors surfaced while running the server process.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// Bootstrap failed.
    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),
    /// The listener failed to start or its thread panicked.
    #[error(transparent)]
    Listener(#[from] ListenerError),
    /// Waiting for shutdown failed.
    #[error(transparent)]
    Shutdown(#[from] ShutdownError),
}

/// Runs the server with the production collaborators until signalled.
///
/// # Errors
///
/// Returns [`LaunchError`] when bootstrap, listening, or signal handling fails.
pub fn run_server() -> Result<(), LaunchError> {
    run_server_with(
        &SystemConfigLoader,
        Arc::new(StructuredHealthReporter::new()),
        &SystemShutdownSignal,
    )
}

/// Runs the server with injected collaborators.
///
/// # Errors
///
/// Returns [`LaunchError`] when bootstrap, listening, or waiting for
/// `shutdown` fails.
pub fn run_server_with(
    loader: &dyn ConfigLoader,
    reporter: Arc<dyn HealthReporter>,
    shutdown: &dyn ShutdownSignal,
) -> Result<(), LaunchError> {
    let server = bootstrap_with(loader, reporter)?;
    let listener = server.start()?;
    let waited = shutdown.wait();
    listener.shutdown();
    listener.join()?;
    waited?;
    info!(target: PROCESS_TARGET, "shutdown sequence completed");
    Ok(())
}

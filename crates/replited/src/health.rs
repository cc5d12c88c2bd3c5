//! Structured health reporting for server lifecycle events.

use std::sync::Arc;

use replite_config::{Config, SocketEndpoint};

use crate::bootstrap::BootstrapError;
use crate::transport::ListenerError;

const HEALTH_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::health");

/// Observer notified at each lifecycle milestone.
pub trait HealthReporter: Send + Sync {
    /// Invoked before configuration loading begins.
    fn bootstrap_starting(&self);

    /// Invoked after bootstrap completes successfully.
    fn bootstrap_succeeded(&self, config: &Config);

    /// Invoked when bootstrap fails.
    fn bootstrap_failed(&self, error: &BootstrapError);

    /// Invoked once the listener accepts connections.
    fn listener_started(&self, endpoint: &SocketEndpoint);

    /// Invoked when the listener could not be started.
    fn listener_failed(&self, error: &ListenerError);
}

impl<T> HealthReporter for Arc<T>
where
    T: HealthReporter,
{
    fn bootstrap_starting(&self) {
        (**self).bootstrap_starting();
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        (**self).bootstrap_succeeded(config);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        (**self).bootstrap_failed(error);
    }

    fn listener_started(&self, endpoint: &SocketEndpoint) {
        (**self).listener_started(endpoint);
    }

    fn listener_failed(&self, error: &ListenerError) {
        (**self).listener_failed(error);
    }
}

/// Default reporter that records lifecycle events using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredHealthReporter;

impl StructuredHealthReporter {
    /// Builds a new reporter.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl HealthReporter for StructuredHealthReporter {
    fn bootstrap_starting(&self) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_starting",
            "starting server bootstrap"
        );
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "bootstrap_succeeded",
            listen = %config.listen(),
            replication = %config.replication(),
            data_dir = %config.data_dir(),
            log_filter = %config.log_filter(),
            log_format = ?config.log_format(),
            "server bootstrap completed"
        );
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        tracing::error!(
            target: HEALTH_TARGET,
            event = "bootstrap_failed",
            error = %error,
            "server bootstrap failed"
        );
    }

    fn listener_started(&self, endpoint: &SocketEndpoint) {
        tracing::info!(
            target: HEALTH_TARGET,
            event = "listener_started",
            endpoint = %endpoint,
            "accepting client connections"
        );
    }

    fn listener_failed(&self, error: &ListenerError) {
        tracing::error!(
            target: HEALTH_TARGET,
            event = "listener_failed",
            error = %error,
            "listener failed to start"
        );
    }
}

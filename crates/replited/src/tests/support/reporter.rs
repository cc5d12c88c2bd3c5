//! Health reporter that records lifecycle events for assertions.

use std::sync::Mutex;

use replite_config::{Config, SocketEndpoint};

use crate::bootstrap::BootstrapError;
use crate::health::HealthReporter;
use crate::transport::ListenerError;

/// Structured health events tracked during scenarios.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum HealthEvent {
    BootstrapStarting,
    BootstrapSucceeded,
    BootstrapFailed(String),
    ListenerStarted,
    ListenerFailed(String),
}

#[derive(Default)]
pub(crate) struct RecordingHealthReporter {
    events: Mutex<Vec<HealthEvent>>,
}

impl RecordingHealthReporter {
    /// Captures a copy of the recorded events.
    pub(crate) fn events(&self) -> Vec<HealthEvent> {
        self.events
            .lock()
            .expect("health reporter mutex poisoned")
            .clone()
    }

    fn record(&self, event: HealthEvent) {
        self.events
            .lock()
            .expect("health reporter mutex poisoned")
            .push(event);
    }
}

impl HealthReporter for RecordingHealthReporter {
    fn bootstrap_starting(&self) {
        self.record(HealthEvent::BootstrapStarting);
    }

    fn bootstrap_succeeded(&self, _config: &Config) {
        self.record(HealthEvent::BootstrapSucceeded);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        self.record(HealthEvent::BootstrapFailed(error.to_string()));
    }

    fn listener_started(&self, _endpoint: &SocketEndpoint) {
        self.record(HealthEvent::ListenerStarted);
    }

    fn listener_failed(&self, error: &ListenerError) {
        self.record(HealthEvent::ListenerFailed(error.to_string()));
    }
}

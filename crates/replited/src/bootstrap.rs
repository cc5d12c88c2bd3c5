//! Server bootstrap orchestration.

use std::fs;
use std::io;
use std::sync::Arc;

use camino::Utf8PathBuf;
use ortho_config::{OrthoConfig, OrthoError};
use thiserror::Error;

use replite_config::{Config, SocketPreparationError};

use crate::gateway::GatewayContext;
use crate::health::HealthReporter;
use crate::replication::{LocalReplication, ReplicationRegistry, StaticCluster};
use crate::telemetry::{self, TelemetryError, TelemetryHandle};
use crate::transport::{
    ConnectionSettings, GatewayConnectionHandler, ListenerError, ListenerHandle, SocketListener,
};

/// Trait abstracting configuration loading for testability.
pub trait ConfigLoader: Send + Sync {
    /// Loads the server configuration.
    fn load(&self) -> Result<Config, Arc<OrthoError>>;
}

/// Loader that delegates to [`Config::load`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemConfigLoader;

impl ConfigLoader for SystemConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Config::load()
    }
}

/// Loader returning a configuration fixed at construction.
#[derive(Debug, Clone)]
pub struct StaticConfigLoader {
    config: Config,
}

impl StaticConfigLoader {
    /// Wraps an already resolved configuration.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

impl ConfigLoader for StaticConfigLoader {
    fn load(&self) -> Result<Config, Arc<OrthoError>> {
        Ok(self.config.clone())
    }
}

/// Errors surfaced during bootstrap.
#[derive(Debug, Error)]
pub enum BootstrapError {
    /// Configuration failed to load.
    #[error("failed to load configuration: {source}")]
    Configuration {
        /// Underlying loader error.
        #[source]
        source: Arc<OrthoError>,
    },
    /// Telemetry initialisation failed.
    #[error("failed to initialise telemetry: {source}")]
    Telemetry {
        /// Underlying telemetry error.
        #[source]
        source: TelemetryError,
    },
    /// Socket preparation failed.
    #[error("failed to prepare server socket: {source}")]
    Socket {
        /// Filesystem error reported while preparing the socket directory.
        #[source]
        source: SocketPreparationError,
    },
    /// The data directory could not be created.
    #[error("failed to prepare data directory '{path}': {source}")]
    DataDirectory {
        /// Configured data directory.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Bootstrapped server, ready to accept connections.
pub struct Server {
    config: Config,
    replication: ReplicationRegistry,
    telemetry: TelemetryHandle,
    reporter: Arc<dyn HealthReporter>,
}

impl Server {
    fn new(
        config: Config,
        replication: ReplicationRegistry,
        telemetry: TelemetryHandle,
        reporter: Arc<dyn HealthReporter>,
    ) -> Self {
        Self {
            config,
            replication,
            telemetry,
            reporter,
        }
    }

    /// Accessor for the resolved configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Replication backends available to `open` requests.
    #[must_use]
    pub fn replication(&self) -> &ReplicationRegistry {
        &self.replication
    }

    /// Accessor for the telemetry handle, primarily useful for testing.
    #[must_use]
    pub fn telemetry(&self) -> TelemetryHandle {
        self.telemetry
    }

    /// Binds the configured endpoint and starts serving clients.
    ///
    /// # Errors
    ///
    /// Returns [`ListenerError`] when the endpoint cannot be bound or the
    /// event loop cannot be started.
    pub fn start(&self) -> Result<ListenerHandle, ListenerError> {
        let outcome = self.bind_and_start();
        match &outcome {
            Ok(_) => self.reporter.listener_started(self.config.listen()),
            Err(error) => self.reporter.listener_failed(error),
        }
        outcome
    }

    fn bind_and_start(&self) -> Result<ListenerHandle, ListenerError> {
        let listener = SocketListener::bind(self.config.listen())?;
        let local_addr = listener.local_addr();
        let address = self.config.listen().leader_address(local_addr);
        let context = GatewayContext::new(
            self.replication.clone(),
            Arc::new(StaticCluster::new(address)),
            self.config.heartbeat_timeout(),
        );
        let settings = ConnectionSettings {
            heartbeat_timeout: self.config.heartbeat_timeout(),
            max_frame_bytes: self.config.max_frame_bytes(),
        };
        let handler = Arc::new(GatewayConnectionHandler::new(Arc::new(context), settings));
        listener
            .start(handler)
            .map(|handle| handle.with_local_addr(local_addr))
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Server")
            .field("config", &self.config)
            .field("replication", &self.replication)
            .finish_non_exhaustive()
    }
}

/// Bootstraps the server using the supplied collaborators.
///
/// # Errors
///
/// Returns [`BootstrapError`] when configuration, telemetry, the socket
/// directory, or the data directory cannot be prepared. The reporter is told
/// about the failure before it is returned.
pub fn bootstrap_with(
    loader: &dyn ConfigLoader,
    reporter: Arc<dyn HealthReporter>,
) -> Result<Server, BootstrapError> {
    reporter.bootstrap_starting();
    match prepare(loader) {
        Ok((config, replication, telemetry)) => {
            reporter.bootstrap_succeeded(&config);
            Ok(Server::new(config, replication, telemetry, reporter))
        }
        Err(error) => {
            reporter.bootstrap_failed(&error);
            Err(error)
        }
    }
}

fn prepare(
    loader: &dyn ConfigLoader,
) -> Result<(Config, ReplicationRegistry, TelemetryHandle), BootstrapError> {
    let config = loader
        .load()
        .map_err(|source| BootstrapError::Configuration { source })?;
    let telemetry =
        telemetry::initialise(&config).map_err(|source| BootstrapError::Telemetry { source })?;
    config
        .listen()
        .prepare_filesystem()
        .map_err(|source| BootstrapError::Socket { source })?;
    fs::create_dir_all(config.data_dir()).map_err(|source| BootstrapError::DataDirectory {
        path: config.data_dir().clone(),
        source,
    })?;

    let mut replication = ReplicationRegistry::new();
    replication.register(Arc::new(LocalReplication::new(
        config.replication(),
        config.data_dir(),
    )));
    Ok((config, replication, telemetry))
}

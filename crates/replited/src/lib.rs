//! Server core for a replicated SQLite service.
//!
//! Clients connect over TCP or a Unix socket, send an 8-byte protocol
//! version, then exchange framed requests and responses. Each connection
//! owns a [`Gateway`] which opens at most one [`Database`] on the client's
//! behalf and executes prepared statements, ad-hoc SQL, and explicit
//! transactions against it.
//!
//! Databases run in WAL mode with a [`Replication`] backend registered as the
//! connection's leader hook. Every backend exposes a [`WalFile`] whose
//! transaction refcount tracks how many writers are mid-transaction on that
//! file, so replication can tell whether the WAL may be shipped.
//!
//! All connections of one server are served by a single-threaded event loop;
//! nothing in the request path blocks except the database engine itself.

mod bootstrap;
pub mod database;
mod error_context;
pub mod gateway;
mod health;
mod process;
pub mod protocol;
mod registry;
pub mod replication;
mod telemetry;
mod transport;

pub use bootstrap::{
    BootstrapError, ConfigLoader, Server, StaticConfigLoader, SystemConfigLoader, bootstrap_with,
};
pub use database::{Database, DatabaseError};
pub use error_context::ErrorContext;
pub use gateway::{Gateway, GatewayContext, GatewayError};
pub use health::{HealthReporter, StructuredHealthReporter};
pub use process::{
    LaunchError, ShutdownError, ShutdownSignal, SystemShutdownSignal, run_server, run_server_with,
};
pub use registry::{Registry, RegistryError};
pub use replication::{
    Cluster, LocalReplication, Replication, ReplicationError, ReplicationRegistry, ServerInfo,
    StaticCluster, WalFile,
};
pub use telemetry::{TelemetryError, TelemetryHandle};
pub use transport::{
    Connection, ConnectionError, ConnectionSettings, ConnectionState, ListenerError,
    ListenerHandle,
};

#[cfg(test)]
mod tests;

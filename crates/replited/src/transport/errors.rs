//! Error types for the listener and client connections.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

use crate::protocol::ProtocolError;

/// Errors surfaced while binding or running the socket listener.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("failed to resolve TCP address {host}:{port}: {source}")]
    Resolve {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },
    #[error("no TCP addresses resolved for {host}:{port}")]
    ResolveEmpty { host: String, port: u16 },
    #[error("failed to bind TCP listener at {addr}: {source}")]
    BindTcp {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("failed to enable non-blocking listener: {source}")]
    NonBlocking {
        #[source]
        source: io::Error,
    },
    #[error("failed to build event loop: {source}")]
    Runtime {
        #[source]
        source: io::Error,
    },
    #[error("failed to start the event loop thread: {source}")]
    Spawn {
        #[source]
        source: io::Error,
    },
    #[error("failed to register listener with the event loop: {source}")]
    Register {
        #[source]
        source: io::Error,
    },
    #[cfg(not(unix))]
    #[error("unix sockets are unsupported for endpoint {endpoint}")]
    UnsupportedUnix { endpoint: String },
    #[cfg(unix)]
    #[error("failed to bind unix listener at {path}: {source}")]
    BindUnix {
        path: String,
        #[source]
        source: io::Error,
    },
    #[cfg(unix)]
    #[error("existing unix socket {path} is already in use")]
    UnixInUse { path: String },
    #[cfg(unix)]
    #[error("unix socket path {path} is not a socket")]
    UnixNotSocket { path: String },
    #[cfg(unix)]
    #[error("failed to read metadata for unix socket {path}: {source}")]
    UnixMetadata {
        path: String,
        #[source]
        source: io::Error,
    },
    #[cfg(unix)]
    #[error("failed to connect to existing unix socket {path}: {source}")]
    UnixConnect {
        path: String,
        #[source]
        source: io::Error,
    },
    #[cfg(unix)]
    #[error("failed to remove stale unix socket {path}: {source}")]
    UnixCleanup {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("listener thread panicked")]
    ThreadPanic,
}

/// Reasons a client connection is aborted.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The peer closed its side.
    #[error("read error: end of file")]
    EndOfFile,
    /// Reading from the socket failed.
    #[error("read error: {0}")]
    Read(#[source] io::Error),
    /// Writing to the socket failed.
    #[error("write error: {0}")]
    Write(#[source] io::Error),
    /// The client broke the wire protocol.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    /// A response could not be encoded.
    #[error("failed to encode response: {0}")]
    Encode(#[from] serde_json::Error),
    /// Nothing arrived within the liveness window.
    #[error("no heartbeat since {elapsed_ms} milliseconds")]
    HeartbeatTimeout { elapsed_ms: u128 },
    /// The owning server is shutting down.
    #[error("server shutting down")]
    Shutdown,
}

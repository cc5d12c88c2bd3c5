//! Socket transport for client connections.
//!
//! The listener binds the configured endpoint and runs an event loop on a
//! background thread. Each accepted socket becomes a [`Connection`] serving
//! one client until it closes.

mod connection;
mod errors;
mod handler;
mod listener;
#[cfg(test)]
mod listener_tests;
#[cfg(test)]
mod test_utils;

pub use self::connection::{Connection, ConnectionSettings, ConnectionState};
pub use self::errors::{ConnectionError, ListenerError};
pub(crate) use self::handler::{
    ConnectionHandler, ConnectionStream, ConnectionTask, GatewayConnectionHandler,
};
pub use self::listener::ListenerHandle;
pub(crate) use self::listener::SocketListener;
#[cfg(test)]
pub(crate) use self::test_utils::CountingHandler;

const LISTENER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::transport");
const CONNECTION_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::connection");

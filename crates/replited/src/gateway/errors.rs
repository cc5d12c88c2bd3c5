//! Error types for request dispatch.

use thiserror::Error;

use crate::database::DatabaseError;
use crate::protocol::{DecodeError, codes};
use crate::registry::RegistryError;

/// Request-level failures. Each one becomes a failure response; none of
/// them closes the connection.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The frame did not decode into a request.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// The database ID does not name an open database.
    #[error("no db with id {id}")]
    DatabaseNotFound { id: u32 },

    /// The connection already has a database open.
    #[error("a database is already open on this connection")]
    AlreadyOpen,

    /// The database layer rejected the request.
    #[error(transparent)]
    Database(#[from] DatabaseError),

    /// The database registry could not grow.
    #[error("unable to register database: {0}")]
    Registry(#[from] RegistryError),
}

impl GatewayError {
    /// Numeric code reported to clients.
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            Self::Decode(error) => error.code(),
            Self::DatabaseNotFound { .. } => codes::NOTFOUND,
            Self::AlreadyOpen => codes::MISUSE,
            Self::Database(error) => error.code(),
            Self::Registry(_) => codes::NOMEM,
        }
    }
}

//! Error types for database operations.

use rusqlite::ffi;
use thiserror::Error;

use crate::registry::RegistryError;
use crate::replication::ReplicationError;

/// Errors surfaced by [`Database`](super::Database) operations.
///
/// Every variant maps to the numeric code carried in failure responses, see
/// [`DatabaseError::code`].
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// The replication method named on open is not registered.
    #[error("no such vfs: {name}")]
    NoSuchVfs { name: String },

    /// The backend refused to map the database name onto a file.
    #[error("unable to open database: {source}")]
    CantOpen {
        #[source]
        source: ReplicationError,
    },

    /// The engine reported a failure.
    #[error("{message}")]
    Engine {
        code: i32,
        message: String,
        #[source]
        source: rusqlite::Error,
    },

    /// A configuration step of `open` failed.
    #[error("{step}: {message}")]
    Setup {
        step: &'static str,
        code: i32,
        message: String,
    },

    /// The statement ID does not name a live statement.
    #[error("no stmt with id {id}")]
    StatementNotFound { id: u32 },

    /// The call violated the database's usage contract.
    #[error("{message}")]
    Misuse { message: &'static str },

    /// The statement registry could not grow.
    #[error("unable to register statement: {0}")]
    Registry(#[from] RegistryError),
}

impl DatabaseError {
    /// Wraps an engine error, keeping its extended result code.
    pub fn engine(source: rusqlite::Error) -> Self {
        Self::Engine {
            code: engine_code(&source),
            message: source.to_string(),
            source,
        }
    }

    /// Wraps an engine error with the configuration step that failed.
    pub fn setup(step: &'static str, source: &rusqlite::Error) -> Self {
        Self::Setup {
            step,
            code: engine_code(source),
            message: source.to_string(),
        }
    }

    /// Creates a misuse error.
    pub fn misuse(message: &'static str) -> Self {
        Self::Misuse { message }
    }

    /// Numeric code reported to clients.
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            Self::NoSuchVfs { .. } | Self::CantOpen { .. } => ffi::SQLITE_CANTOPEN,
            Self::Engine { code, .. } | Self::Setup { code, .. } => *code,
            Self::StatementNotFound { .. } => ffi::SQLITE_NOTFOUND,
            Self::Misuse { .. } => ffi::SQLITE_MISUSE,
            Self::Registry(_) => ffi::SQLITE_NOMEM,
        }
    }

    /// Whether the engine answered `SQLITE_BUSY`.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        matches!(self, Self::Engine { source, .. } if is_busy(source))
    }
}

pub(crate) fn is_busy(error: &rusqlite::Error) -> bool {
    matches!(
        error,
        rusqlite::Error::SqliteFailure(
            ffi::Error {
                code: rusqlite::ErrorCode::DatabaseBusy,
                ..
            },
            _,
        )
    )
}

fn engine_code(error: &rusqlite::Error) -> i32 {
    match error {
        rusqlite::Error::SqliteFailure(failure, _) => failure.extended_code,
        rusqlite::Error::InvalidParameterCount(..) | rusqlite::Error::InvalidParameterName(_) => {
            ffi::SQLITE_RANGE
        }
        _ => ffi::SQLITE_ERROR,
    }
}

//! Error types for the wire protocol.

use thiserror::Error;

/// Connection-fatal protocol violations.
///
/// None of these produce a response; the connection is aborted.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The client opened with a version this server does not speak.
    #[error("unknown protocol version: {version:x}")]
    UnknownVersion { version: u64 },

    /// A header declared a payload above the configured limit.
    #[error("frame payload of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: u64, max: u32 },

    /// A header carried a revision this server does not understand.
    #[error("unsupported frame revision {revision}")]
    UnsupportedRevision { revision: u8 },

    /// The payload buffer could not be allocated.
    #[error("unable to allocate {len} byte payload buffer: out of memory")]
    OutOfMemory { len: u32 },
}

/// Request-level decoding failures, answered with a failure response.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// No request or response kind has this opcode.
    #[error("unknown message kind {kind}")]
    UnknownKind { kind: u8 },

    /// The payload did not match the kind's schema.
    #[error("failed to decode request: {source}")]
    Payload {
        #[source]
        source: serde_json::Error,
    },
}

impl From<serde_json::Error> for DecodeError {
    fn from(source: serde_json::Error) -> Self {
        Self::Payload { source }
    }
}

impl DecodeError {
    /// Numeric code reported to clients.
    #[must_use]
    pub fn code(&self) -> i32 {
        match self {
            Self::UnknownKind { .. } => super::codes::PROTO,
            Self::Payload { .. } => super::codes::PARSE,
        }
    }
}

//! Response kinds and payload schemas.

use serde::{Deserialize, Serialize};
use strum::{Display, FromRepr};

use super::{DecodeError, decode_payload, encode_frame};
use crate::database::{ExecResult, Rows};
use crate::replication::ServerInfo;

/// Response opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, FromRepr)]
#[strum(serialize_all = "snake_case")]
#[repr(u8)]
pub enum ResponseKind {
    Failure = 0,
    Server = 1,
    Welcome = 2,
    Servers = 3,
    Db = 4,
    Stmt = 5,
    Result = 6,
    Rows = 7,
    Empty = 8,
}

/// A request-level failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub code: i32,
    pub message: String,
}

/// Address of the current leader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerAddress {
    pub address: String,
}

/// Acknowledges client registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Welcome {
    pub heartbeat_timeout_ms: u64,
}

/// Cluster membership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Servers {
    pub servers: Vec<ServerInfo>,
}

/// An opened database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Db {
    pub id: u32,
}

/// A prepared statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stmt {
    pub db_id: u32,
    pub id: u32,
    pub params: usize,
    pub columns: usize,
    pub tail: String,
}

/// A response ready to be framed.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Failure(Failure),
    Server(ServerAddress),
    Welcome(Welcome),
    Servers(Servers),
    Db(Db),
    Stmt(Stmt),
    Result(ExecResult),
    Rows(Rows),
    Empty,
}

impl Response {
    /// Builds a failure response.
    pub fn failure(code: i32, message: impl Into<String>) -> Self {
        Self::Failure(Failure {
            code,
            message: message.into(),
        })
    }

    /// Opcode of this response.
    #[must_use]
    pub fn kind(&self) -> ResponseKind {
        match self {
            Self::Failure(_) => ResponseKind::Failure,
            Self::Server(_) => ResponseKind::Server,
            Self::Welcome(_) => ResponseKind::Welcome,
            Self::Servers(_) => ResponseKind::Servers,
            Self::Db(_) => ResponseKind::Db,
            Self::Stmt(_) => ResponseKind::Stmt,
            Self::Result(_) => ResponseKind::Result,
            Self::Rows(_) => ResponseKind::Rows,
            Self::Empty => ResponseKind::Empty,
        }
    }

    /// Encodes the response as a complete frame.
    ///
    /// # Errors
    ///
    /// Fails when the payload cannot be serialised or exceeds a `u32`
    /// length.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        let payload = match self {
            Self::Failure(body) => serde_json::to_vec(body)?,
            Self::Server(body) => serde_json::to_vec(body)?,
            Self::Welcome(body) => serde_json::to_vec(body)?,
            Self::Servers(body) => serde_json::to_vec(body)?,
            Self::Db(body) => serde_json::to_vec(body)?,
            Self::Stmt(body) => serde_json::to_vec(body)?,
            Self::Result(body) => serde_json::to_vec(body)?,
            Self::Rows(body) => serde_json::to_vec(body)?,
            Self::Empty => Vec::new(),
        };
        encode_frame(self.kind() as u8, &payload).ok_or_else(|| {
            <serde_json::Error as serde::ser::Error>::custom("payload exceeds u32 length")
        })
    }

    /// Decodes a response frame payload.
    ///
    /// # Errors
    ///
    /// Fails on an unknown opcode or a malformed payload.
    pub fn decode(kind: u8, payload: &[u8]) -> Result<Self, DecodeError> {
        let kind = ResponseKind::from_repr(kind).ok_or(DecodeError::UnknownKind { kind })?;
        Ok(match kind {
            ResponseKind::Failure => Self::Failure(decode_payload(payload)?),
            ResponseKind::Server => Self::Server(decode_payload(payload)?),
            ResponseKind::Welcome => Self::Welcome(decode_payload(payload)?),
            ResponseKind::Servers => Self::Servers(decode_payload(payload)?),
            ResponseKind::Db => Self::Db(decode_payload(payload)?),
            ResponseKind::Stmt => Self::Stmt(decode_payload(payload)?),
            ResponseKind::Result => Self::Result(decode_payload(payload)?),
            ResponseKind::Rows => Self::Rows(decode_payload(payload)?),
            ResponseKind::Empty => Self::Empty,
        })
    }
}

//! Request kinds and payload schemas.

use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};
use strum::{Display, FromRepr};

use super::{DecodeError, decode_payload};
use crate::database::Value;

/// Request opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, FromRepr)]
#[strum(serialize_all = "snake_case")]
#[repr(u8)]
pub enum RequestKind {
    Leader = 0,
    Client = 1,
    Heartbeat = 2,
    Open = 3,
    Prepare = 4,
    Exec = 5,
    Query = 6,
    Finalize = 7,
    ExecSql = 8,
    QuerySql = 9,
    Begin = 10,
    Commit = 11,
    Rollback = 12,
}

/// Client registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    /// Client-chosen identifier.
    #[serde(default)]
    pub id: u64,
}

/// Liveness check from the client.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Heartbeat {
    /// Client timestamp, echoed into logs only.
    #[serde(default)]
    pub timestamp: Option<u64>,
}

/// Opens a database through a replication backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Open {
    pub name: String,
    #[serde(default)]
    pub flags: i32,
    pub replication: String,
}

/// Compiles SQL on an open database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prepare {
    pub db_id: u32,
    pub sql: String,
}

/// Runs a prepared statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatementCall {
    pub db_id: u32,
    pub stmt_id: u32,
    #[serde(default)]
    pub params: Vec<Value>,
}

/// Names a prepared statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementRef {
    pub db_id: u32,
    pub stmt_id: u32,
}

/// Runs SQL text without a prepared statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlCall {
    pub db_id: u32,
    pub sql: String,
    #[serde(default)]
    pub params: Vec<Value>,
}

/// Names an open database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbRef {
    pub db_id: u32,
}

/// A decoded request.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    Leader,
    Client(Client),
    Heartbeat(Heartbeat),
    Open(Open),
    Prepare(Prepare),
    Exec(StatementCall),
    Query(StatementCall),
    Finalize(StatementRef),
    ExecSql(SqlCall),
    QuerySql(SqlCall),
    Begin(DbRef),
    Commit(DbRef),
    Rollback(DbRef),
}

impl Request {
    /// Decodes the payload of a frame with opcode `kind`.
    ///
    /// # Errors
    ///
    /// Fails on an unknown opcode or a payload that does not fit the kind.
    pub fn decode(kind: u8, payload: &[u8]) -> Result<Self, DecodeError> {
        let kind = RequestKind::from_repr(kind).ok_or(DecodeError::UnknownKind { kind })?;
        let request = match kind {
            RequestKind::Leader => {
                decode_payload::<IgnoredAny>(payload)?;
                Self::Leader
            }
            RequestKind::Client => Self::Client(decode_payload(payload)?),
            RequestKind::Heartbeat => Self::Heartbeat(decode_payload(payload)?),
            RequestKind::Open => Self::Open(decode_payload(payload)?),
            RequestKind::Prepare => Self::Prepare(decode_payload(payload)?),
            RequestKind::Exec => Self::Exec(decode_payload(payload)?),
            RequestKind::Query => Self::Query(decode_payload(payload)?),
            RequestKind::Finalize => Self::Finalize(decode_payload(payload)?),
            RequestKind::ExecSql => Self::ExecSql(decode_payload(payload)?),
            RequestKind::QuerySql => Self::QuerySql(decode_payload(payload)?),
            RequestKind::Begin => Self::Begin(decode_payload(payload)?),
            RequestKind::Commit => Self::Commit(decode_payload(payload)?),
            RequestKind::Rollback => Self::Rollback(decode_payload(payload)?),
        };
        Ok(request)
    }

    /// Opcode of this request.
    #[must_use]
    pub fn kind(&self) -> RequestKind {
        match self {
            Self::Leader => RequestKind::Leader,
            Self::Client(_) => RequestKind::Client,
            Self::Heartbeat(_) => RequestKind::Heartbeat,
            Self::Open(_) => RequestKind::Open,
            Self::Prepare(_) => RequestKind::Prepare,
            Self::Exec(_) => RequestKind::Exec,
            Self::Query(_) => RequestKind::Query,
            Self::Finalize(_) => RequestKind::Finalize,
            Self::ExecSql(_) => RequestKind::ExecSql,
            Self::QuerySql(_) => RequestKind::QuerySql,
            Self::Begin(_) => RequestKind::Begin,
            Self::Commit(_) => RequestKind::Commit,
            Self::Rollback(_) => RequestKind::Rollback,
        }
    }

    /// Encodes the request as a complete frame.
    ///
    /// # Errors
    ///
    /// Fails when the payload cannot be serialised.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        let payload = match self {
            Self::Leader => Vec::new(),
            Self::Client(body) => serde_json::to_vec(body)?,
            Self::Heartbeat(body) => serde_json::to_vec(body)?,
            Self::Open(body) => serde_json::to_vec(body)?,
            Self::Prepare(body) => serde_json::to_vec(body)?,
            Self::Exec(body) | Self::Query(body) => serde_json::to_vec(body)?,
            Self::Finalize(body) => serde_json::to_vec(body)?,
            Self::ExecSql(body) | Self::QuerySql(body) => serde_json::to_vec(body)?,
            Self::Begin(body) | Self::Commit(body) | Self::Rollback(body) => {
                serde_json::to_vec(body)?
            }
        };
        super::encode_frame(self.kind() as u8, &payload).ok_or_else(|| {
            <serde_json::Error as serde::ser::Error>::custom("payload exceeds u32 length")
        })
    }
}

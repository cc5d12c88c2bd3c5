//! Wire protocol spoken between clients and the server.
//!
//! A connection opens with an eight byte little-endian protocol version.
//! Everything after it is a sequence of frames: an eight byte header carrying
//! the payload length, the message kind, and a revision byte, followed by a
//! JSON payload. Requests and responses share the frame layout.

pub mod codes;
mod errors;
mod framing;
mod handshake;
mod request;
mod response;

pub use self::errors::{DecodeError, ProtocolError};
pub use self::framing::{
    Frame, Framer, HEADER_BYTES, Header, INLINE_PAYLOAD_BYTES, encode_frame,
};
pub use self::handshake::{Handshake, PROTOCOL_VERSION};
pub use self::request::{
    Client, DbRef, Heartbeat, Open, Prepare, Request, RequestKind, SqlCall, StatementCall,
    StatementRef,
};
pub use self::response::{Db, Failure, Response, ResponseKind, ServerAddress, Servers, Stmt, Welcome};

/// Decodes a JSON payload, treating zero bytes as `{}`.
fn decode_payload<T: serde::de::DeserializeOwned>(payload: &[u8]) -> Result<T, serde_json::Error> {
    if payload.is_empty() {
        serde_json::from_slice(b"{}")
    } else {
        serde_json::from_slice(payload)
    }
}

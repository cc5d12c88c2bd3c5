//! Numeric codes carried in failure responses.
//!
//! Engine failures report SQLite extended result codes unchanged. The codes
//! below cover failures that originate in the server itself.

use rusqlite::ffi;

/// Allocation failure.
pub const NOMEM: i32 = ffi::SQLITE_NOMEM;
/// Unknown database or statement ID.
pub const NOTFOUND: i32 = ffi::SQLITE_NOTFOUND;
/// Request violates the usage contract.
pub const MISUSE: i32 = ffi::SQLITE_MISUSE;
/// Unknown request kind.
pub const PROTO: i32 = 1001;
/// Request payload could not be decoded.
pub const PARSE: i32 = 1005;

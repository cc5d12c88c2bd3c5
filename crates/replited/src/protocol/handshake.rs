//! First-contact protocol version exchange.

use super::ProtocolError;

/// The only protocol version this server speaks.
pub const PROTOCOL_VERSION: u64 = 0x8610_4dd7_6043_3fe5;

const VERSION_BYTES: usize = 8;

/// Accumulates the client's version word across reads.
#[derive(Debug, Default)]
pub struct Handshake {
    buffer: [u8; VERSION_BYTES],
    filled: usize,
}

impl Handshake {
    /// Creates a handshake awaiting its first byte.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Consumes version bytes from `bytes`.
    ///
    /// Returns the negotiated version once all eight bytes have arrived,
    /// together with whatever followed them in `bytes`.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::UnknownVersion`] for any version other than
    /// [`PROTOCOL_VERSION`].
    pub fn feed<'a>(&mut self, bytes: &'a [u8]) -> Result<(Option<u64>, &'a [u8]), ProtocolError> {
        let wanted = VERSION_BYTES - self.filled;
        let (taken, rest) = bytes.split_at(wanted.min(bytes.len()));
        self.buffer[self.filled..self.filled + taken.len()].copy_from_slice(taken);
        self.filled += taken.len();
        if self.filled < VERSION_BYTES {
            return Ok((None, rest));
        }

        let version = u64::from_le_bytes(self.buffer);
        if version != PROTOCOL_VERSION {
            return Err(ProtocolError::UnknownVersion { version });
        }
        Ok((Some(version), rest))
    }
}

//! Frame header codec and the incremental framing state machine.

use super::ProtocolError;

/// Size of an encoded [`Header`].
pub const HEADER_BYTES: usize = 8;

/// Payloads up to this size are assembled without heap allocation.
pub const INLINE_PAYLOAD_BYTES: usize = 1024;

const SUPPORTED_REVISION: u8 = 0;

/// Fixed-width frame header.
///
/// Layout, little-endian: payload length (`u32`), kind (`u8`), revision
/// (`u8`), two reserved bytes written as zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Exact payload byte count.
    pub len: u32,
    /// Request or response opcode.
    pub kind: u8,
    /// Frame layout revision, always zero today.
    pub revision: u8,
}

impl Header {
    /// Builds a current-revision header.
    #[must_use]
    pub const fn new(kind: u8, len: u32) -> Self {
        Self {
            len,
            kind,
            revision: SUPPORTED_REVISION,
        }
    }

    /// Encodes the header.
    #[must_use]
    pub fn encode(&self) -> [u8; HEADER_BYTES] {
        let mut bytes = [0_u8; HEADER_BYTES];
        bytes[..4].copy_from_slice(&self.len.to_le_bytes());
        bytes[4] = self.kind;
        bytes[5] = self.revision;
        bytes
    }

    /// Decodes a header, ignoring the reserved bytes.
    ///
    /// # Errors
    ///
    /// Rejects any revision other than zero.
    pub fn decode(bytes: [u8; HEADER_BYTES]) -> Result<Self, ProtocolError> {
        let [l0, l1, l2, l3, kind, revision, _, _] = bytes;
        if revision != SUPPORTED_REVISION {
            return Err(ProtocolError::UnsupportedRevision { revision });
        }
        Ok(Self {
            len: u32::from_le_bytes([l0, l1, l2, l3]),
            kind,
            revision,
        })
    }
}

/// Prefixes `payload` with a header for `kind`.
///
/// Returns `None` when the payload does not fit a `u32` length.
#[must_use]
pub fn encode_frame(kind: u8, payload: &[u8]) -> Option<Vec<u8>> {
    let len = u32::try_from(payload.len()).ok()?;
    let mut bytes = Vec::with_capacity(HEADER_BYTES + payload.len());
    bytes.extend_from_slice(&Header::new(kind, len).encode());
    bytes.extend_from_slice(payload);
    Some(bytes)
}

/// A complete frame handed to the frame-ready callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    /// Opcode from the header.
    pub kind: u8,
    /// Payload bytes, valid for the duration of the callback.
    pub payload: &'a [u8],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    AwaitingHeader,
    AwaitingPayload(Header),
}

/// Turns an arbitrarily chunked byte stream into complete frames.
///
/// Partial headers and payloads are buffered between calls to
/// [`Framer::feed`]. Frames are emitted in arrival order, each exactly once.
#[derive(Debug)]
pub struct Framer {
    max_payload: u32,
    state: State,
    header: [u8; HEADER_BYTES],
    header_filled: usize,
    inline: [u8; INLINE_PAYLOAD_BYTES],
    heap: Vec<u8>,
    payload_filled: usize,
}

impl Framer {
    /// Creates a framer rejecting payloads above `max_payload` bytes.
    #[must_use]
    pub fn new(max_payload: u32) -> Self {
        Self {
            max_payload,
            state: State::AwaitingHeader,
            header: [0; HEADER_BYTES],
            header_filled: 0,
            inline: [0; INLINE_PAYLOAD_BYTES],
            heap: Vec::new(),
            payload_filled: 0,
        }
    }

    /// Whether the framer sits between frames.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.state == State::AwaitingHeader && self.header_filled == 0
    }

    /// Consumes `bytes`, calling `on_frame` for every frame they complete.
    ///
    /// Returns the number of frames emitted.
    ///
    /// # Errors
    ///
    /// Fails on a malformed or oversized header, or when a heap payload
    /// buffer cannot be allocated. The framer must not be fed again after an
    /// error.
    pub fn feed(
        &mut self,
        mut bytes: &[u8],
        mut on_frame: impl FnMut(Frame<'_>),
    ) -> Result<usize, ProtocolError> {
        let mut emitted = 0;
        while !bytes.is_empty() || self.pending_empty_frame() {
            match self.state {
                State::AwaitingHeader => {
                    bytes = self.fill_header(bytes);
                    if self.header_filled < HEADER_BYTES {
                        break;
                    }
                    self.header_filled = 0;
                    let header = Header::decode(self.header)?;
                    self.begin_payload(header)?;
                }
                State::AwaitingPayload(header) => {
                    bytes = self.fill_payload(header, bytes);
                    if self.payload_filled < payload_len(header) {
                        break;
                    }
                    on_frame(Frame {
                        kind: header.kind,
                        payload: self.payload(header),
                    });
                    emitted += 1;
                    self.finish_payload();
                }
            }
        }
        Ok(emitted)
    }

    fn pending_empty_frame(&self) -> bool {
        matches!(self.state, State::AwaitingPayload(header) if header.len == 0)
    }

    fn fill_header<'a>(&mut self, bytes: &'a [u8]) -> &'a [u8] {
        let wanted = HEADER_BYTES - self.header_filled;
        let (taken, rest) = bytes.split_at(wanted.min(bytes.len()));
        self.header[self.header_filled..self.header_filled + taken.len()].copy_from_slice(taken);
        self.header_filled += taken.len();
        rest
    }

    fn begin_payload(&mut self, header: Header) -> Result<(), ProtocolError> {
        if header.len > self.max_payload {
            return Err(ProtocolError::FrameTooLarge {
                len: u64::from(header.len),
                max: self.max_payload,
            });
        }
        let len = payload_len(header);
        if len > INLINE_PAYLOAD_BYTES {
            let mut heap = Vec::new();
            heap.try_reserve_exact(len)
                .map_err(|_| ProtocolError::OutOfMemory { len: header.len })?;
            heap.resize(len, 0);
            self.heap = heap;
        }
        self.payload_filled = 0;
        self.state = State::AwaitingPayload(header);
        Ok(())
    }

    fn fill_payload<'a>(&mut self, header: Header, bytes: &'a [u8]) -> &'a [u8] {
        let len = payload_len(header);
        let wanted = len - self.payload_filled;
        let (taken, rest) = bytes.split_at(wanted.min(bytes.len()));
        let start = self.payload_filled;
        let target = if len > INLINE_PAYLOAD_BYTES {
            &mut self.heap[start..start + taken.len()]
        } else {
            &mut self.inline[start..start + taken.len()]
        };
        target.copy_from_slice(taken);
        self.payload_filled += taken.len();
        rest
    }

    fn payload(&self, header: Header) -> &[u8] {
        let len = payload_len(header);
        if len > INLINE_PAYLOAD_BYTES {
            &self.heap
        } else {
            &self.inline[..len]
        }
    }

    fn finish_payload(&mut self) {
        self.heap = Vec::new();
        self.payload_filled = 0;
        self.state = State::AwaitingHeader;
    }
}

fn payload_len(header: Header) -> usize {
    usize::try_from(header.len).unwrap_or(usize::MAX)
}

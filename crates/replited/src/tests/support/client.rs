//! Blocking wire client used to drive a running server.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use crate::protocol::{HEADER_BYTES, Header, PROTOCOL_VERSION, Request, Response};

pub(crate) struct TestClient {
    stream: TcpStream,
}

impl TestClient {
    /// Connects and sends the protocol version.
    pub(crate) fn connect(addr: SocketAddr) -> Self {
        Self::connect_with_version(addr, PROTOCOL_VERSION)
    }

    pub(crate) fn connect_with_version(addr: SocketAddr, version: u64) -> Self {
        let mut stream = TcpStream::connect(addr).expect("connect to server");
        stream
            .set_read_timeout(Some(Duration::from_secs(5)))
            .expect("set read timeout");
        stream
            .write_all(&version.to_le_bytes())
            .expect("send protocol version");
        Self { stream }
    }

    pub(crate) fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).expect("write to server");
    }

    pub(crate) fn request(&mut self, request: &Request) -> Response {
        let frame = request.encode().expect("request encodes");
        self.send_raw(&frame);
        self.read_response()
    }

    pub(crate) fn read_response(&mut self) -> Response {
        let mut header = [0_u8; HEADER_BYTES];
        self.stream
            .read_exact(&mut header)
            .expect("read response header");
        let header = Header::decode(header).expect("valid response header");
        let len = usize::try_from(header.len).expect("length fits usize");
        let mut payload = vec![0_u8; len];
        self.stream
            .read_exact(&mut payload)
            .expect("read response payload");
        Response::decode(header.kind, &payload).expect("decodable response")
    }

    /// Whether the server closed the connection without sending anything.
    pub(crate) fn closed_silently(&mut self) -> bool {
        let mut rest = Vec::new();
        matches!(self.stream.read_to_end(&mut rest), Ok(0))
    }
}

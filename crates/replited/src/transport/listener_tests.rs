//! Tests for the socket listener.

use std::io::Read;
use std::net::TcpStream;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rstest::{fixture, rstest};
use tokio::sync::watch;

use replite_config::SocketEndpoint;

use super::listener::{EVENT_LOOP_THREAD, SocketListener};
use super::{ConnectionHandler, ConnectionStream, ConnectionTask, CountingHandler, ListenerError};

struct CountingFixture {
    count: Arc<AtomicUsize>,
    handler: Arc<dyn ConnectionHandler>,
}

#[fixture]
fn counting_fixture() -> CountingFixture {
    let (count, handler) = CountingHandler::new();
    CountingFixture { count, handler }
}

#[fixture]
fn tcp_endpoint() -> SocketEndpoint {
    SocketEndpoint::tcp("127.0.0.1", 0)
}

fn wait_for_count(count: &AtomicUsize, expected: usize) -> bool {
    let deadline = Instant::now() + Duration::from_secs(2);
    while Instant::now() < deadline {
        if count.load(Ordering::SeqCst) >= expected {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    false
}

#[rstest]
fn tcp_listener_accepts_connections(
    tcp_endpoint: SocketEndpoint,
    counting_fixture: CountingFixture,
) {
    let listener = SocketListener::bind(&tcp_endpoint).expect("bind tcp listener");
    let addr = listener
        .local_addr()
        .expect("listener should report local address");
    let CountingFixture { count, handler } = counting_fixture;
    let handle = listener.start(handler).expect("start listener");

    let _first = TcpStream::connect(addr).expect("connect first client");
    let _second = TcpStream::connect(addr).expect("connect second client");

    assert!(wait_for_count(&count, 2), "expected two connections");
    handle.shutdown();
    handle.join().expect("join listener");
}

#[rstest]
fn shutdown_closes_open_connections(
    tcp_endpoint: SocketEndpoint,
    counting_fixture: CountingFixture,
) {
    let listener = SocketListener::bind(&tcp_endpoint).expect("bind tcp listener");
    let addr = listener.local_addr().expect("local address");
    let CountingFixture { count, handler } = counting_fixture;
    let handle = listener.start(handler).expect("start listener");

    let mut client = TcpStream::connect(addr).expect("connect client");
    assert!(wait_for_count(&count, 1), "expected one connection");
    handle.shutdown();
    handle.join().expect("join listener");

    client
        .set_read_timeout(Some(Duration::from_secs(2)))
        .expect("set read timeout");
    let mut rest = Vec::new();
    let read = client.read_to_end(&mut rest).expect("read until close");
    assert_eq!(read, 0);
}

#[cfg(unix)]
#[fixture]
fn unix_tempdir() -> tempfile::TempDir {
    tempfile::tempdir().expect("temp dir")
}

#[cfg(unix)]
#[rstest]
fn unix_listener_cleans_stale_socket_files(
    unix_tempdir: tempfile::TempDir,
    counting_fixture: CountingFixture,
) {
    let path = unix_tempdir.path().join("replited.sock");
    {
        let _stale = std::os::unix::net::UnixListener::bind(&path).expect("bind stale listener");
    }
    assert!(path.exists(), "stale socket should remain");

    let endpoint = SocketEndpoint::unix(path.to_str().expect("utf8 path"));
    let listener = SocketListener::bind(&endpoint).expect("bind new listener");
    let CountingFixture { count, handler } = counting_fixture;
    let handle = listener.start(handler).expect("start listener");

    let _client = std::os::unix::net::UnixStream::connect(&path).expect("connect unix client");
    assert!(wait_for_count(&count, 1), "expected one connection");

    handle.shutdown();
    handle.join().expect("join listener");
    assert!(
        !path.exists(),
        "listener should remove unix socket on shutdown"
    );
}

#[cfg(unix)]
#[rstest]
fn unix_listener_rejects_in_use_socket(unix_tempdir: tempfile::TempDir) {
    let path = unix_tempdir.path().join("replited.sock");
    let _existing = std::os::unix::net::UnixListener::bind(&path).expect("bind existing listener");

    let endpoint = SocketEndpoint::unix(path.to_str().expect("utf8 path"));
    let error = SocketListener::bind(&endpoint).expect_err("should fail bind");
    assert!(matches!(error, ListenerError::UnixInUse { .. }));
}

#[cfg(unix)]
#[rstest]
fn unix_listener_rejects_regular_files(unix_tempdir: tempfile::TempDir) {
    let path = unix_tempdir.path().join("replited.sock");
    std::fs::write(&path, b"not a socket").expect("write file");

    let endpoint = SocketEndpoint::unix(path.to_str().expect("utf8 path"));
    let error = SocketListener::bind(&endpoint).expect_err("should fail bind");
    assert!(matches!(error, ListenerError::UnixNotSocket { .. }));
}

/// Records the name of the thread each connection is handed over on.
#[derive(Default)]
struct ThreadNameHandler {
    names: Mutex<Vec<Option<String>>>,
}

impl ConnectionHandler for ThreadNameHandler {
    fn handle(&self, stream: ConnectionStream, _shutdown: watch::Receiver<bool>) -> ConnectionTask {
        let name = std::thread::current().name().map(str::to_owned);
        self.names.lock().expect("names lock").push(name);
        Box::pin(async move { drop(stream) })
    }
}

#[rstest]
fn connections_are_served_on_the_event_loop_thread(tcp_endpoint: SocketEndpoint) {
    let listener = SocketListener::bind(&tcp_endpoint).expect("bind tcp listener");
    let addr = listener.local_addr().expect("tcp address");
    let handler = Arc::new(ThreadNameHandler::default());
    let handle = listener
        .start(Arc::clone(&handler) as Arc<dyn ConnectionHandler>)
        .expect("start listener");

    let _client = TcpStream::connect(addr).expect("connect client");
    let deadline = Instant::now() + Duration::from_secs(2);
    while handler.names.lock().expect("names lock").is_empty() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(10));
    }
    handle.shutdown();
    handle.join().expect("join listener");

    let names = handler.names.lock().expect("names lock");
    assert_eq!(names.as_slice(), [Some(String::from(EVENT_LOOP_THREAD))]);
}

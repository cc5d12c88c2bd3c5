//! Listener accepting client sockets on a single-threaded event loop.

use std::io;
use std::net::{SocketAddr, TcpListener as StdTcpListener, ToSocketAddrs};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tokio::runtime::{Builder, Runtime};
use tokio::sync::watch;
use tokio::task::LocalSet;
use tracing::{debug, info, warn};

use replite_config::SocketEndpoint;

use super::{ConnectionHandler, ConnectionStream, LISTENER_TARGET, ListenerError};

#[cfg(unix)]
use std::fs;
#[cfg(unix)]
use std::os::unix::fs::FileTypeExt;
#[cfg(unix)]
use std::os::unix::net::{UnixListener as StdUnixListener, UnixStream as StdUnixStream};
#[cfg(unix)]
use std::path::Path;

const ERROR_BACKOFF: Duration = Duration::from_millis(150);

/// Name of the thread running the event loop, as shown in log lines.
pub(crate) const EVENT_LOOP_THREAD: &str = "replited-event-loop";

/// Listener bound to a socket endpoint, not yet accepting.
#[derive(Debug)]
pub(crate) struct SocketListener {
    endpoint: SocketEndpoint,
    listener: BoundListener,
}

#[derive(Debug)]
enum BoundListener {
    Tcp(StdTcpListener),
    #[cfg(unix)]
    Unix(StdUnixListener),
}

enum AcceptingListener {
    Tcp(tokio::net::TcpListener),
    #[cfg(unix)]
    Unix(tokio::net::UnixListener),
}

impl AcceptingListener {
    async fn accept(&self) -> io::Result<ConnectionStream> {
        match self {
            Self::Tcp(listener) => {
                let (stream, _) = listener.accept().await?;
                stream.set_nodelay(true)?;
                Ok(ConnectionStream::Tcp(stream))
            }
            #[cfg(unix)]
            Self::Unix(listener) => {
                let (stream, _) = listener.accept().await?;
                Ok(ConnectionStream::Unix(stream))
            }
        }
    }
}

impl SocketListener {
    pub(crate) fn bind(endpoint: &SocketEndpoint) -> Result<Self, ListenerError> {
        match endpoint {
            SocketEndpoint::Tcp { host, port } => {
                let listener = bind_tcp(host, *port)?;
                Ok(Self {
                    endpoint: endpoint.clone(),
                    listener: BoundListener::Tcp(listener),
                })
            }
            SocketEndpoint::Unix { path } => {
                #[cfg(unix)]
                {
                    let listener = bind_unix(path.as_std_path())?;
                    Ok(Self {
                        endpoint: endpoint.clone(),
                        listener: BoundListener::Unix(listener),
                    })
                }

                #[cfg(not(unix))]
                {
                    let _ = path;
                    Err(ListenerError::UnsupportedUnix {
                        endpoint: endpoint.to_string(),
                    })
                }
            }
        }
    }

    pub(crate) fn local_addr(&self) -> Option<SocketAddr> {
        match &self.listener {
            BoundListener::Tcp(listener) => listener.local_addr().ok(),
            #[cfg(unix)]
            BoundListener::Unix(_) => None,
        }
    }

    /// Moves the listener onto its own event loop thread.
    ///
    /// Every accepted connection is served by a task on that loop, so
    /// connections never run in parallel with each other.
    pub(crate) fn start(
        self,
        handler: Arc<dyn ConnectionHandler>,
    ) -> Result<ListenerHandle, ListenerError> {
        let Self { endpoint, listener } = self;
        let prepared = prepare_event_loop(listener);
        let (runtime, listener) = match prepared {
            Ok(prepared) => prepared,
            Err(error) => {
                #[cfg(unix)]
                cleanup_unix_socket(&endpoint);
                return Err(error);
            }
        };

        let (shutdown, shutdown_rx) = watch::channel(false);
        #[cfg(unix)]
        let bound = endpoint.clone();
        let spawned = thread::Builder::new()
            .name(String::from(EVENT_LOOP_THREAD))
            .spawn(move || {
                let local = LocalSet::new();
                local.block_on(
                    &runtime,
                    accept_loop(&endpoint, &listener, handler, shutdown_rx),
                );
                drop(listener);
                #[cfg(unix)]
                cleanup_unix_socket(&endpoint);
                runtime.block_on(local);
                debug!(target: LISTENER_TARGET, endpoint = %endpoint, "connections drained");
            });
        let handle = spawned.map_err(|source| {
            #[cfg(unix)]
            cleanup_unix_socket(&bound);
            ListenerError::Spawn { source }
        })?;
        Ok(ListenerHandle {
            shutdown,
            handle: Some(handle),
            local_addr: None,
        })
    }
}

/// Handle to the background listener thread.
///
/// Dropping the handle requests shutdown without waiting for it.
#[derive(Debug)]
pub struct ListenerHandle {
    shutdown: watch::Sender<bool>,
    handle: Option<thread::JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

impl ListenerHandle {
    pub(crate) fn with_local_addr(mut self, local_addr: Option<SocketAddr>) -> Self {
        self.local_addr = local_addr;
        self
    }

    /// Bound TCP address; `None` for Unix sockets.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Stops accepting and asks every open connection to close.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Waits for the event loop thread to drain its connections and exit.
    ///
    /// # Errors
    ///
    /// Returns [`ListenerError::ThreadPanic`] if the thread panicked.
    pub fn join(mut self) -> Result<(), ListenerError> {
        match self.handle.take() {
            Some(handle) => handle.join().map_err(|_| ListenerError::ThreadPanic),
            None => Ok(()),
        }
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}

fn prepare_event_loop(
    listener: BoundListener,
) -> Result<(Runtime, AcceptingListener), ListenerError> {
    let runtime = Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|source| ListenerError::Runtime { source })?;
    let accepting = {
        let _entered = runtime.enter();
        match listener {
            BoundListener::Tcp(listener) => {
                listener
                    .set_nonblocking(true)
                    .map_err(|source| ListenerError::NonBlocking { source })?;
                tokio::net::TcpListener::from_std(listener)
                    .map(AcceptingListener::Tcp)
                    .map_err(|source| ListenerError::Register { source })?
            }
            #[cfg(unix)]
            BoundListener::Unix(listener) => {
                listener
                    .set_nonblocking(true)
                    .map_err(|source| ListenerError::NonBlocking { source })?;
                tokio::net::UnixListener::from_std(listener)
                    .map(AcceptingListener::Unix)
                    .map_err(|source| ListenerError::Register { source })?
            }
        }
    };
    Ok((runtime, accepting))
}

async fn accept_loop(
    endpoint: &SocketEndpoint,
    listener: &AcceptingListener,
    handler: Arc<dyn ConnectionHandler>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(
        target: LISTENER_TARGET,
        endpoint = %endpoint,
        "socket listener active"
    );
    let mut last_error = None::<io::ErrorKind>;
    loop {
        let accepted = tokio::select! {
            accepted = listener.accept() => accepted,
            _ = shutdown.wait_for(|stop| *stop) => break,
        };
        match accepted {
            Ok(stream) => {
                last_error = None;
                tokio::task::spawn_local(handler.handle(stream, shutdown.clone()));
            }
            Err(error) => {
                let kind = error.kind();
                if last_error != Some(kind) {
                    warn!(
                        target: LISTENER_TARGET,
                        error = %error,
                        "socket accept error"
                    );
                }
                last_error = Some(kind);
                tokio::time::sleep(ERROR_BACKOFF).await;
            }
        }
    }
    info!(target: LISTENER_TARGET, endpoint = %endpoint, "socket listener stopped");
}

fn bind_tcp(host: &str, port: u16) -> Result<StdTcpListener, ListenerError> {
    let mut addrs = (host, port)
        .to_socket_addrs()
        .map_err(|source| ListenerError::Resolve {
            host: host.to_owned(),
            port,
            source,
        })?;
    let addr = addrs.next().ok_or_else(|| ListenerError::ResolveEmpty {
        host: host.to_owned(),
        port,
    })?;
    StdTcpListener::bind(addr).map_err(|source| ListenerError::BindTcp { addr, source })
}

#[cfg(unix)]
fn bind_unix(path: &Path) -> Result<StdUnixListener, ListenerError> {
    if path.exists() {
        let display = path.display().to_string();
        let metadata = fs::symlink_metadata(path).map_err(|source| ListenerError::UnixMetadata {
            path: display.clone(),
            source,
        })?;
        if !metadata.file_type().is_socket() {
            return Err(ListenerError::UnixNotSocket { path: display });
        }
        match StdUnixStream::connect(path) {
            Ok(_stream) => return Err(ListenerError::UnixInUse { path: display }),
            Err(error)
                if matches!(
                    error.kind(),
                    io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound
                ) =>
            {
                fs::remove_file(path).map_err(|source| ListenerError::UnixCleanup {
                    path: display,
                    source,
                })?;
            }
            Err(source) => {
                return Err(ListenerError::UnixConnect {
                    path: display,
                    source,
                });
            }
        }
    }

    StdUnixListener::bind(path).map_err(|source| ListenerError::BindUnix {
        path: path.display().to_string(),
        source,
    })
}

#[cfg(unix)]
fn cleanup_unix_socket(endpoint: &SocketEndpoint) {
    let Some(path) = endpoint.unix_path() else {
        return;
    };
    if let Err(error) = fs::remove_file(path.as_std_path())
        && error.kind() != io::ErrorKind::NotFound
    {
        warn!(
            target: LISTENER_TARGET,
            error = %error,
            path = %path,
            "failed to remove unix socket file"
        );
    }
}

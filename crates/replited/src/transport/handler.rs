//! Connection handling abstractions for the listener.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio::sync::watch;

#[cfg(unix)]
use tokio::net::UnixStream;

use super::{Connection, ConnectionSettings};
use crate::gateway::{Gateway, GatewayContext};

/// Stream types accepted by the listener.
#[derive(Debug)]
pub(crate) enum ConnectionStream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

impl AsyncRead for ConnectionStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(stream) => Pin::new(stream).poll_read(cx, buf),
            #[cfg(unix)]
            Self::Unix(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for ConnectionStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            Self::Tcp(stream) => Pin::new(stream).poll_write(cx, buf),
            #[cfg(unix)]
            Self::Unix(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(stream) => Pin::new(stream).poll_flush(cx),
            #[cfg(unix)]
            Self::Unix(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            Self::Tcp(stream) => Pin::new(stream).poll_shutdown(cx),
            #[cfg(unix)]
            Self::Unix(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

/// Task driving one accepted connection on the listener's event loop.
pub(crate) type ConnectionTask = Pin<Box<dyn Future<Output = ()>>>;

/// Handles accepted socket connections.
pub(crate) trait ConnectionHandler: Send + Sync + 'static {
    /// Builds the task serving `stream` until it closes or `shutdown` fires.
    fn handle(&self, stream: ConnectionStream, shutdown: watch::Receiver<bool>) -> ConnectionTask;
}

/// Serves each connection with its own [`Gateway`].
#[derive(Debug, Clone)]
pub(crate) struct GatewayConnectionHandler {
    context: Arc<GatewayContext>,
    settings: ConnectionSettings,
}

impl GatewayConnectionHandler {
    pub(crate) fn new(context: Arc<GatewayContext>, settings: ConnectionSettings) -> Self {
        Self { context, settings }
    }
}

impl ConnectionHandler for GatewayConnectionHandler {
    fn handle(&self, stream: ConnectionStream, shutdown: watch::Receiver<bool>) -> ConnectionTask {
        let gateway = Gateway::new(Arc::clone(&self.context));
        let mut connection = Connection::new(stream, gateway, self.settings);
        Box::pin(async move {
            connection.run(shutdown).await;
        })
    }
}

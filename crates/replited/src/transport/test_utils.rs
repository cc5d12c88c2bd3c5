//! Test helpers for the transport module.

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use tokio::sync::watch;

use super::{ConnectionHandler, ConnectionStream, ConnectionTask};

/// Counts accepted streams and holds each open until shutdown.
pub(crate) struct CountingHandler {
    count: Arc<AtomicUsize>,
}

impl CountingHandler {
    pub(crate) fn new() -> (Arc<AtomicUsize>, Arc<Self>) {
        let count = Arc::new(AtomicUsize::new(0));
        let handler = Arc::new(Self {
            count: Arc::clone(&count),
        });
        (count, handler)
    }
}

impl ConnectionHandler for CountingHandler {
    fn handle(&self, stream: ConnectionStream, mut shutdown: watch::Receiver<bool>) -> ConnectionTask {
        self.count.fetch_add(1, Ordering::SeqCst);
        Box::pin(async move {
            let _held = stream;
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
    }
}

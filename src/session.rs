//! Per-connection session state.

use crate::error::{Error, Result};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::Notify;

/// One live conversation with a peer.
///
/// Implemented by [`TcpSession`] for the TCP server and by the file-drop
/// transport. All methods are callable from handler callbacks and from
/// other threads.
pub trait Session: Send + Sync {
    /// Best-effort host portion of the peer address. Never fails on a
    /// live session.
    fn remote_address(&self) -> String;

    /// Queue records for transmission. The session's own execution
    /// context performs the framed write, so concurrent sends on one
    /// session are serialised and never interleave on the wire.
    fn send(&self, records: &[&[u8]]) -> Result<()>;

    /// Shut the session down. Idempotent; once it returns, no further
    /// `data_received` fires for this session.
    fn close(&self);

    /// Whether `close` has been requested.
    fn is_closed(&self) -> bool;
}

/// A session bound to one accepted TCP connection.
#[derive(Debug)]
pub struct TcpSession {
    peer: SocketAddr,
    outbox: mpsc::UnboundedSender<Vec<Vec<u8>>>,
    closed: AtomicBool,
    close_notify: Notify,
    disconnect_reported: AtomicBool,
}

impl TcpSession {
    pub(crate) fn new(peer: SocketAddr) -> (Arc<Self>, mpsc::UnboundedReceiver<Vec<Vec<u8>>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let session = Arc::new(TcpSession {
            peer,
            outbox: tx,
            closed: AtomicBool::new(false),
            close_notify: Notify::new(),
            disconnect_reported: AtomicBool::new(false),
        });
        (session, rx)
    }

    /// The full peer address, host and port.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Resolves when `close` has been called.
    pub(crate) async fn closed(&self) {
        if self.is_closed() {
            return;
        }
        self.close_notify.notified().await;
    }

    /// The disconnect latch: true exactly once.
    pub(crate) fn take_disconnect_report(&self) -> bool {
        !self.disconnect_reported.swap(true, Ordering::SeqCst)
    }
}

impl Session for TcpSession {
    fn remote_address(&self) -> String {
        self.peer.ip().to_string()
    }

    fn send(&self, records: &[&[u8]]) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Send(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "session is closed",
            )));
        }
        let owned: Vec<Vec<u8>> = records.iter().map(|r| r.to_vec()).collect();
        self.outbox.send(owned).map_err(|_| {
            Error::Send(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "session task has exited",
            ))
        })
    }

    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.close_notify.notify_waiters();
        }
        // notify_one keeps a permit for a waiter that arrives late
        self.close_notify.notify_one();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

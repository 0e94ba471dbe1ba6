//! Per-connection outbound queue, in-flight guard and client counting.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, Notify};
use wsjobd_core::ConnectionId;

/// Text frames that may wait for the socket writer. Senders past this
/// point wait until the client reads.
pub const OUTBOUND_CAPACITY: usize = 32;

/// Next frame for a connection's forward task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Text(String),
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SendError {
    #[error("connection closed")]
    Closed,
}

/// Handle to one WebSocket connection, shared by its socket task, the
/// dispatcher and any progress reporters.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    tx: mpsc::Sender<String>,
    closing: AtomicBool,
    close_signal: Notify,
    in_flight: AtomicBool,
}

impl Connection {
    /// Create a handle plus the outbox its forward task drains.
    pub fn open(id: ConnectionId) -> (Arc<Self>, Outbox) {
        let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let conn = Arc::new(Self {
            id,
            tx,
            closing: AtomicBool::new(false),
            close_signal: Notify::new(),
            in_flight: AtomicBool::new(false),
        });
        let outbox = Outbox {
            rx,
            conn: Arc::clone(&conn),
            close_sent: false,
        };
        (conn, outbox)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue a text frame, waiting while the outbound queue is full.
    /// Fails once the connection is closing or its writer is gone.
    pub async fn send(&self, text: String) -> Result<(), SendError> {
        if self.is_closed() {
            return Err(SendError::Closed);
        }
        self.tx.send(text).await.map_err(|_| SendError::Closed)
    }

    /// Close after everything queued so far has been written.
    pub fn close(&self) {
        if !self.closing.swap(true, Ordering::AcqRel) {
            self.close_signal.notify_one();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closing.load(Ordering::Acquire) || self.tx.is_closed()
    }

    /// Claim the connection for one request. `false` means a request is
    /// already being dispatched and the new message should be dropped.
    pub fn try_begin_request(&self) -> bool {
        self.in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn finish_request(&self) {
        self.in_flight.store(false, Ordering::Release);
    }
}

/// Receiving side of a connection's outbound queue.
#[derive(Debug)]
pub struct Outbox {
    rx: mpsc::Receiver<String>,
    conn: Arc<Connection>,
    close_sent: bool,
}

impl Outbox {
    /// Queued text first; once the connection is closing and the queue is
    /// empty, a single `Close`, then `None`.
    pub async fn next(&mut self) -> Option<Outbound> {
        loop {
            if let Ok(text) = self.rx.try_recv() {
                return Some(Outbound::Text(text));
            }
            if self.conn.closing.load(Ordering::Acquire) {
                if self.close_sent {
                    return None;
                }
                self.close_sent = true;
                return Some(Outbound::Close);
            }
            tokio::select! {
                text = self.rx.recv() => return text.map(Outbound::Text),
                _ = self.conn.close_signal.notified() => {}
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn queued(&self) -> usize {
        self.rx.len()
    }
}

/// Number of open WebSocket connections.
#[derive(Debug, Clone, Default)]
pub struct ClientCounter {
    count: Arc<AtomicUsize>,
}

impl ClientCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a connection until the returned guard is dropped.
    pub fn enter(&self) -> ClientGuard {
        self.count.fetch_add(1, Ordering::AcqRel);
        ClientGuard {
            count: Arc::clone(&self.count),
        }
    }

    pub fn current(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }
}

#[derive(Debug)]
pub struct ClientGuard {
    count: Arc<AtomicUsize>,
}

impl Drop for ClientGuard {
    fn drop(&mut self) {
        self.count.fetch_sub(1, Ordering::AcqRel);
    }
}

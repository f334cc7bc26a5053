//! Fixed-capacity datagram queue with drop-newest overflow

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use std::time::Instant;

use bytes::Bytes;
use tokio::sync::mpsc;

/// Identity of the socket a datagram arrived on
///
/// Replies and relays for a session go out through the socket it registered
/// on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SocketId(pub usize);

impl std::fmt::Display for SocketId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "socket#{}", self.0)
    }
}

/// One raw inbound datagram awaiting processing
#[derive(Debug, Clone)]
pub struct RawDatagram {
    /// Datagram bytes as received
    pub data: Bytes,
    /// Sender address
    pub sender: SocketAddr,
    /// Receipt time
    pub received_at: Instant,
    /// Socket the datagram arrived on
    pub socket: SocketId,
}

/// Outcome of one bounded-timeout pop
#[derive(Debug)]
pub enum Pop {
    /// An entry was dequeued
    Entry(RawDatagram),
    /// The timeout elapsed with the queue empty; retry after checking flags
    Empty,
    /// All producers are gone and the queue is drained
    Closed,
}

/// Producer handle: non-blocking push, drop-newest on overflow
#[derive(Debug, Clone)]
pub struct BoundedQueue {
    tx: mpsc::Sender<RawDatagram>,
    dropped: Arc<AtomicU64>,
    capacity: usize,
}

/// Consumer handle, owned by exactly one worker
#[derive(Debug)]
pub struct QueueReceiver {
    rx: mpsc::Receiver<RawDatagram>,
}

/// Create a queue with the given capacity
pub fn channel(capacity: usize) -> (BoundedQueue, QueueReceiver) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        BoundedQueue {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
            capacity: capacity.max(1),
        },
        QueueReceiver { rx },
    )
}

impl BoundedQueue {
    /// Create a queue with the given capacity
    pub fn with_capacity(capacity: usize) -> (Self, QueueReceiver) {
        channel(capacity)
    }

    /// Enqueue without blocking
    ///
    /// Returns `false` when the entry was dropped (queue full or consumer
    /// gone); the drop counter is incremented either way the entry is lost.
    pub fn push(&self, entry: RawDatagram) -> bool {
        match self.tx.try_send(entry) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(entry)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    sender = %entry.sender,
                    socket = %entry.socket,
                    "Ingestion queue full, datagram dropped"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(entry)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    sender = %entry.sender,
                    "Ingestion queue closed, datagram dropped"
                );
                false
            }
        }
    }

    /// Datagrams dropped on the push side so far
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Configured capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl QueueReceiver {
    /// Pop with a bounded wait
    pub async fn pop(&mut self, timeout: Duration) -> Pop {
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(entry)) => Pop::Entry(entry),
            Ok(None) => Pop::Closed,
            Err(_) => Pop::Empty,
        }
    }

    /// Drain whatever is immediately available, up to `limit`
    ///
    /// Used by the shutdown path to empty queues inside the drain deadline.
    pub fn drain_ready(&mut self, limit: usize) -> Vec<RawDatagram> {
        let mut out = Vec::new();
        while out.len() < limit {
            match self.rx.try_recv() {
                Ok(entry) => out.push(entry),
                Err(_) => break,
            }
        }
        out
    }
}

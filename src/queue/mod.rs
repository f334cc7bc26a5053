//! Bounded ingestion queue
//!
//! Fixed-capacity FIFO between the socket ingestion loops and the worker
//! pool. The ingestion side never blocks: a push into a full queue drops the
//! newest datagram and increments the queue's drop counter. The consumer
//! side polls with a bounded timeout so a worker can observe the shutdown
//! flag between waits.
//!
//! The reflector runs one queue per worker, sharded by sender address, so
//! frames from one origin are always processed in arrival order.

pub mod bounded;

pub use bounded::{channel, BoundedQueue, Pop, QueueReceiver, RawDatagram, SocketId};

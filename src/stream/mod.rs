//! Stream (transmission) management
//!
//! At most one in-flight transmission per talk-group. A header frame opens
//! a stream, data frames advance it, a terminator or the timeout sweep
//! closes it. Competing headers lose: first wins, no preemption.

pub mod manager;
pub mod state;

pub use manager::{ClosedStream, Forwarded, StreamManager};
pub use state::{SequenceState, Stream, StreamError};

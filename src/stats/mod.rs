//! Reflector counters
//!
//! Every drop path in the system increments exactly one of these counters;
//! there is no silent discard. Counters are relaxed atomics; they are
//! diagnostics, not synchronization.

pub mod metrics;

pub use metrics::{ReflectorStats, StatsSnapshot};

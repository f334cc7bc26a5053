//! Atomic counters and snapshots

use std::sync::atomic::{AtomicU64, Ordering};

/// Process-wide reflector counters
///
/// Shared as `Arc<ReflectorStats>`; incremented from ingestion loops,
/// workers, sweeps, and the monitor.
#[derive(Debug, Default)]
pub struct ReflectorStats {
    /// Datagrams received across all sockets
    pub packets_received: AtomicU64,
    /// Data frames fanned out (one count per receiving session)
    pub frames_relayed: AtomicU64,
    /// Bytes fanned out
    pub bytes_relayed: AtomicU64,
    /// Datagrams dropped for bad magic/length/frame-position
    pub malformed: AtomicU64,
    /// Datagrams dropped by access control
    pub acl_dropped: AtomicU64,
    /// Datagrams dropped because an ingestion queue was full
    pub queue_dropped: AtomicU64,
    /// Datagrams dropped for protocol-state reasons (unknown sender, stale)
    pub unroutable: AtomicU64,
    /// Header frames rejected because the talk-group was busy
    pub collisions: AtomicU64,
    /// Data/terminator frames for a token no longer tracked
    pub stale_frames: AtomicU64,
    /// Sessions removed by the timeout sweep
    pub sessions_expired: AtomicU64,
    /// Streams closed by the timeout sweep
    pub streams_timed_out: AtomicU64,
    /// Sends that failed or timed out after retry
    pub send_errors: AtomicU64,
    /// Registrations rejected at capacity
    pub capacity_rejections: AtomicU64,
    /// Detected internal inconsistencies (logged, never fatal)
    pub invariant_violations: AtomicU64,
}

impl ReflectorStats {
    /// Create a zeroed counter set
    pub fn new() -> Self {
        Self::default()
    }

    /// Point-in-time copy of all counters
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            packets_received: self.packets_received.load(Ordering::Relaxed),
            frames_relayed: self.frames_relayed.load(Ordering::Relaxed),
            bytes_relayed: self.bytes_relayed.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            acl_dropped: self.acl_dropped.load(Ordering::Relaxed),
            queue_dropped: self.queue_dropped.load(Ordering::Relaxed),
            unroutable: self.unroutable.load(Ordering::Relaxed),
            collisions: self.collisions.load(Ordering::Relaxed),
            stale_frames: self.stale_frames.load(Ordering::Relaxed),
            sessions_expired: self.sessions_expired.load(Ordering::Relaxed),
            streams_timed_out: self.streams_timed_out.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
            capacity_rejections: self.capacity_rejections.load(Ordering::Relaxed),
            invariant_violations: self.invariant_violations.load(Ordering::Relaxed),
        }
    }

    /// Increment one counter by one
    pub fn bump(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time view of [`ReflectorStats`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub packets_received: u64,
    pub frames_relayed: u64,
    pub bytes_relayed: u64,
    pub malformed: u64,
    pub acl_dropped: u64,
    pub queue_dropped: u64,
    pub unroutable: u64,
    pub collisions: u64,
    pub stale_frames: u64,
    pub sessions_expired: u64,
    pub streams_timed_out: u64,
    pub send_errors: u64,
    pub capacity_rejections: u64,
    pub invariant_violations: u64,
}

impl std::fmt::Display for StatsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "rx={} relayed={} bytes={} malformed={} acl={} queue={} unroutable={} \
             collisions={} stale={} expired={} timed_out={} send_err={} capacity={} invariant={}",
            self.packets_received,
            self.frames_relayed,
            self.bytes_relayed,
            self.malformed,
            self.acl_dropped,
            self.queue_dropped,
            self.unroutable,
            self.collisions,
            self.stale_frames,
            self.sessions_expired,
            self.streams_timed_out,
            self.send_errors,
            self.capacity_rejections,
            self.invariant_violations,
        )
    }
}

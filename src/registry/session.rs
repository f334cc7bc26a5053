//! Client session record

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crate::queue::SocketId;

/// Session lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Registered, no keep-alive seen yet
    Pending,
    /// Refreshed by keep-alives
    Active,
    /// Marked by the timeout sweep just before removal
    Expired,
}

/// One registered client
///
/// Keyed by its network address; exactly one session exists per address.
#[derive(Debug)]
pub struct ClientSession {
    /// Network address, the unique key
    pub addr: SocketAddr,
    /// Station callsign as registered
    pub callsign: String,
    /// Talk-group this session belongs to
    pub tgid: u16,
    /// Current lifecycle state
    pub state: SessionState,
    /// Socket the session registered through; replies go out here
    pub socket: SocketId,
    /// Registration time
    pub created_at: Instant,
    /// Last keep-alive or frame time; non-decreasing while Active
    last_activity: Instant,
}

impl ClientSession {
    /// Create a Pending session
    pub fn new(addr: SocketAddr, callsign: String, tgid: u16, socket: SocketId, now: Instant) -> Self {
        Self {
            addr,
            callsign,
            tgid,
            state: SessionState::Pending,
            socket,
            created_at: now,
            last_activity: now,
        }
    }

    /// Refresh on keep-alive or traffic; promotes Pending to Active
    ///
    /// `last_activity` never moves backwards, even if `now` does.
    pub fn touch(&mut self, now: Instant) {
        if now > self.last_activity {
            self.last_activity = now;
        }
        if self.state == SessionState::Pending {
            self.state = SessionState::Active;
        }
    }

    /// Last refresh time
    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    /// True when no activity has been seen within `timeout` of `now`
    pub fn is_idle(&self, timeout: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.last_activity) > timeout
    }
}

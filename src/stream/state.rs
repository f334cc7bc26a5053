//! Per-stream state types

use std::net::SocketAddr;
use std::sync::Weak;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use crate::registry::ClientSession;

/// Frame-sequence progress of a transmission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceState {
    /// Header received, no voice data yet
    HeaderSeen,
    /// At least one voice frame received
    DataSeen,
    /// Terminator received; the stream is closing
    TerminatorSeen,
}

/// One in-flight transmission
///
/// Holds a `Weak` reference to the originating session: the stream relates
/// to it but does not keep it alive past expiry.
#[derive(Debug)]
pub struct Stream {
    /// Correlation token carried by every frame of the transmission
    pub token: u32,
    /// Talk-group the transmission occupies
    pub tgid: u16,
    /// Origin address; frames are never relayed back here
    pub origin_addr: SocketAddr,
    /// Origin callsign, for logging
    pub callsign: String,
    /// Originating session, relation only
    pub origin: Weak<RwLock<ClientSession>>,
    /// When the header arrived
    pub started_at: Instant,
    /// Last frame time, compared against the inactivity window by the sweep
    pub last_frame_at: Instant,
    /// Sequence progress
    pub sequence: SequenceState,
    /// Voice frames relayed so far (header and terminator excluded)
    pub frames: u64,
}

impl Stream {
    /// True when no frame has arrived within `window` of `now`
    pub fn is_idle(&self, window: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.last_frame_at) > window
    }
}

/// Error type for stream operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// The talk-group already carries an active transmission
    Collision { tgid: u16, active_token: u32 },
    /// The manager tracks `max_streams` transmissions already
    LimitReached { max_streams: usize },
    /// The token does not belong to any tracked transmission
    Stale { token: u32 },
}

impl std::fmt::Display for StreamError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamError::Collision { tgid, active_token } => {
                write!(
                    f,
                    "talk-group {} busy with transmission 0x{:08x}",
                    tgid, active_token
                )
            }
            StreamError::LimitReached { max_streams } => {
                write!(f, "stream limit reached ({})", max_streams)
            }
            StreamError::Stale { token } => {
                write!(f, "no transmission for token 0x{:08x}", token)
            }
        }
    }
}

impl std::error::Error for StreamError {}

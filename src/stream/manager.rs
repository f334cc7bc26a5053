//! Stream manager implementation
//!
//! Tracks transmissions by talk-group and by correlation token under one
//! lock, so the two indices can never disagree. Relay fan-out itself
//! happens outside this module: callers collect targets from the registry
//! after the manager releases its lock; no lock is ever held across a
//! network send.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use crate::registry::ClientSession;
use crate::stats::ReflectorStats;

use super::state::{SequenceState, Stream, StreamError};

/// Routing result of an accepted frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Forwarded {
    /// Talk-group to fan out to
    pub tgid: u16,
    /// Originator; excluded from the fan-out set
    pub origin_addr: SocketAddr,
}

/// Final record of a closed transmission
#[derive(Debug, Clone)]
pub struct ClosedStream {
    pub token: u32,
    pub tgid: u16,
    pub origin_addr: SocketAddr,
    pub callsign: String,
    /// Voice frames relayed over the stream's lifetime
    pub frames: u64,
    /// Time from header to close
    pub duration: Duration,
}

struct Inner {
    by_talkgroup: HashMap<u16, Stream>,
    by_token: HashMap<u32, u16>,
}

/// Transmission multiplexer: one stream per talk-group, first header wins
pub struct StreamManager {
    inner: RwLock<Inner>,
    max_streams: usize,
    inactivity: Duration,
    stats: Arc<ReflectorStats>,
}

impl StreamManager {
    /// Create a manager bounded at `max_streams` with the given inactivity window
    pub fn new(max_streams: usize, inactivity: Duration, stats: Arc<ReflectorStats>) -> Self {
        Self {
            inner: RwLock::new(Inner {
                by_talkgroup: HashMap::new(),
                by_token: HashMap::new(),
            }),
            max_streams,
            inactivity,
            stats,
        }
    }

    /// Open a transmission, or reject the header
    ///
    /// First header wins: a competing header for a busy talk-group gets
    /// `Collision` and the active stream is untouched. `LimitReached` bounds
    /// the total tracked streams; no slot is freed to make room.
    pub async fn begin_or_reject(
        &self,
        tgid: u16,
        origin_addr: SocketAddr,
        callsign: &str,
        token: u32,
        origin: Weak<RwLock<ClientSession>>,
        now: Instant,
    ) -> Result<(), StreamError> {
        let mut inner = self.inner.write().await;

        if let Some(active) = inner.by_talkgroup.get(&tgid) {
            self.stats.bump(&self.stats.collisions);
            tracing::debug!(
                tgid = tgid,
                loser = %origin_addr,
                active_token = active.token,
                "Header rejected, talk-group busy"
            );
            return Err(StreamError::Collision {
                tgid,
                active_token: active.token,
            });
        }
        if let Some(other_tgid) = inner.by_token.get(&token) {
            // Token reuse across talk-groups; treat as a collision with the
            // transmission that owns the token
            self.stats.bump(&self.stats.collisions);
            tracing::debug!(token = token, tgid = other_tgid, "Header reuses an active token");
            return Err(StreamError::Collision {
                tgid: *other_tgid,
                active_token: token,
            });
        }
        if inner.by_talkgroup.len() >= self.max_streams {
            self.stats.bump(&self.stats.capacity_rejections);
            return Err(StreamError::LimitReached {
                max_streams: self.max_streams,
            });
        }

        inner.by_token.insert(token, tgid);
        inner.by_talkgroup.insert(
            tgid,
            Stream {
                token,
                tgid,
                origin_addr,
                callsign: callsign.to_string(),
                origin,
                started_at: now,
                last_frame_at: now,
                sequence: SequenceState::HeaderSeen,
                frames: 0,
            },
        );

        tracing::info!(
            tgid = tgid,
            origin = %origin_addr,
            callsign = callsign,
            token = token,
            "Transmission opened"
        );
        Ok(())
    }

    /// Advance a transmission with one voice frame
    ///
    /// Returns the fan-out routing, or `Stale` when the token belongs to no
    /// tracked transmission (closed, timed out, or never opened). Only the
    /// stream's origin address may advance it; anything else is stale.
    pub async fn advance(
        &self,
        token: u32,
        sender: SocketAddr,
        now: Instant,
    ) -> Result<Forwarded, StreamError> {
        let mut inner = self.inner.write().await;

        let tgid = match inner.by_token.get(&token) {
            Some(tgid) => *tgid,
            None => {
                self.stats.bump(&self.stats.stale_frames);
                return Err(StreamError::Stale { token });
            }
        };
        let stream = match inner.by_talkgroup.get_mut(&tgid) {
            Some(s) => s,
            None => {
                // Token index names a talk-group with no stream
                self.stats.bump(&self.stats.invariant_violations);
                tracing::error!(token = token, tgid = tgid, "Token index out of sync");
                inner.by_token.remove(&token);
                return Err(StreamError::Stale { token });
            }
        };

        if stream.origin_addr != sender {
            self.stats.bump(&self.stats.stale_frames);
            tracing::debug!(
                token = token,
                origin = %stream.origin_addr,
                sender = %sender,
                "Frame sender is not the stream origin"
            );
            return Err(StreamError::Stale { token });
        }

        if now > stream.last_frame_at {
            stream.last_frame_at = now;
        }
        stream.sequence = SequenceState::DataSeen;
        stream.frames += 1;

        Ok(Forwarded {
            tgid,
            origin_addr: stream.origin_addr,
        })
    }

    /// Close a transmission on its terminator frame
    ///
    /// The caller relays the terminator using the returned record in the
    /// same processing step; afterwards the talk-group is free. `None` means
    /// the token was stale or the sender is not the origin (both counted).
    pub async fn terminate(&self, token: u32, sender: SocketAddr, now: Instant) -> Option<ClosedStream> {
        let mut inner = self.inner.write().await;

        let tgid = match inner.by_token.get(&token) {
            Some(tgid) => *tgid,
            None => {
                self.stats.bump(&self.stats.stale_frames);
                return None;
            }
        };
        if let Some(stream) = inner.by_talkgroup.get(&tgid) {
            if stream.origin_addr != sender {
                self.stats.bump(&self.stats.stale_frames);
                tracing::debug!(
                    token = token,
                    origin = %stream.origin_addr,
                    sender = %sender,
                    "Terminator sender is not the stream origin"
                );
                return None;
            }
        }

        inner.by_token.remove(&token);
        let mut stream = match inner.by_talkgroup.remove(&tgid) {
            Some(s) => s,
            None => {
                self.stats.bump(&self.stats.invariant_violations);
                tracing::error!(token = token, tgid = tgid, "Token index out of sync on terminate");
                return None;
            }
        };
        stream.sequence = SequenceState::TerminatorSeen;

        let closed = ClosedStream {
            token,
            tgid,
            origin_addr: stream.origin_addr,
            callsign: stream.callsign,
            frames: stream.frames,
            duration: now.saturating_duration_since(stream.started_at),
        };
        tracing::info!(
            tgid = closed.tgid,
            origin = %closed.origin_addr,
            frames = closed.frames,
            duration_ms = closed.duration.as_millis() as u64,
            "Transmission closed"
        );
        Some(closed)
    }

    /// Close every transmission idle past the configured window
    pub async fn sweep_timeouts(&self, now: Instant) -> usize {
        self.sweep_with_window(self.inactivity, now).await
    }

    /// Close every transmission idle past `window`
    ///
    /// The resource monitor uses a tightened window for early cleanup.
    pub async fn sweep_with_window(&self, window: Duration, now: Instant) -> usize {
        let mut inner = self.inner.write().await;

        let idle: Vec<u16> = inner
            .by_talkgroup
            .iter()
            .filter(|(_, stream)| stream.is_idle(window, now))
            .map(|(tgid, _)| *tgid)
            .collect();

        for tgid in &idle {
            if let Some(stream) = inner.by_talkgroup.remove(tgid) {
                inner.by_token.remove(&stream.token);
                self.stats.bump(&self.stats.streams_timed_out);
                tracing::info!(
                    tgid = stream.tgid,
                    origin = %stream.origin_addr,
                    token = stream.token,
                    idle_ms = now.saturating_duration_since(stream.last_frame_at).as_millis() as u64,
                    "Transmission timed out"
                );
            }
        }
        idle.len()
    }

    /// Administrative reset of one talk-group
    pub async fn reset(&self, tgid: u16) -> bool {
        let mut inner = self.inner.write().await;
        match inner.by_talkgroup.remove(&tgid) {
            Some(stream) => {
                inner.by_token.remove(&stream.token);
                tracing::warn!(tgid = tgid, token = stream.token, "Transmission reset");
                true
            }
            None => false,
        }
    }

    /// Number of tracked transmissions
    pub async fn active_count(&self) -> usize {
        self.inner.read().await.by_talkgroup.len()
    }

    /// True when the talk-group carries a transmission
    pub async fn is_active(&self, tgid: u16) -> bool {
        self.inner.read().await.by_talkgroup.contains_key(&tgid)
    }

    /// Configured inactivity window
    pub fn inactivity_window(&self) -> Duration {
        self.inactivity
    }
}

//! Data frame types
//!
//! A transmission is a sequence of data frames sharing one correlation
//! token: a header frame, zero or more voice data frames, and a terminator.
//! The payload is opaque to the reflector; only the addressing fields and
//! the frame position are interpreted.

use bytes::Bytes;

/// Position of a frame within its transmission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePosition {
    /// Opens a new transmission
    Header,
    /// Voice data within an open transmission
    Data,
    /// Closes the transmission
    Terminator,
}

impl FramePosition {
    /// Parse the wire frame-position byte
    pub fn from_wire(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(FramePosition::Header),
            0x01 => Some(FramePosition::Data),
            0x02 => Some(FramePosition::Terminator),
            _ => None,
        }
    }

    /// Wire encoding of this position
    pub fn to_wire(self) -> u8 {
        match self {
            FramePosition::Header => 0x00,
            FramePosition::Data => 0x01,
            FramePosition::Terminator => 0x02,
        }
    }
}

/// Parsed view of one data frame
///
/// `raw` holds the complete original datagram so relaying never re-encodes;
/// cloning is reference-counted via `Bytes`.
#[derive(Debug, Clone)]
pub struct DataFrame {
    /// Source callsign, trailing padding stripped
    pub callsign: String,
    /// Talk-group the transmission is addressed to
    pub tgid: u16,
    /// Correlation token identifying the transmission
    pub token: u32,
    /// Role of this frame within the transmission
    pub position: FramePosition,
    /// The full datagram as received (relayed verbatim)
    pub raw: Bytes,
}

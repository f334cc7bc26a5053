//! Datagram decoding and reply encoding
//!
//! [`Packet::decode`] validates the magic tag, the packet length, and the
//! frame-position byte, and classifies the datagram. Anything malformed
//! produces a [`ProtocolError`]; the dispatcher drops it with a counter,
//! never a fatal error.

use bytes::{BufMut, Bytes, BytesMut};

use super::constants::*;
use super::frame::{DataFrame, FramePosition};

/// Wire protocol violation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// First four bytes are not a known tag
    BadMagic,
    /// Packet shorter or longer than its tag requires
    BadLength { expected: usize, actual: usize },
    /// Frame-position byte outside the defined range
    InvalidFramePosition(u8),
    /// Callsign field is not printable ASCII
    BadCallsign,
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolError::BadMagic => write!(f, "unknown magic tag"),
            ProtocolError::BadLength { expected, actual } => {
                write!(f, "bad packet length: expected {}, got {}", expected, actual)
            }
            ProtocolError::InvalidFramePosition(b) => {
                write!(f, "invalid frame position byte 0x{:02x}", b)
            }
            ProtocolError::BadCallsign => write!(f, "callsign is not printable ASCII"),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// A classified inbound datagram
#[derive(Debug, Clone)]
pub enum Packet {
    /// Keep-alive; refreshes the sender's session
    Poll { callsign: String },
    /// Registration carrying the talk-group to join
    Login { callsign: String, tgid: u16 },
    /// Explicit departure
    Unlink { callsign: String },
    /// One frame of an in-flight transmission
    Data(DataFrame),
    /// Status query; answered with the 42-byte status reply
    StatusQuery,
}

impl Packet {
    /// Decode and classify one datagram
    pub fn decode(data: &[u8]) -> Result<Packet, ProtocolError> {
        if data.len() < TAG_LEN {
            return Err(ProtocolError::BadMagic);
        }

        let tag: &[u8; 4] = data[..TAG_LEN].try_into().map_err(|_| ProtocolError::BadMagic)?;
        match tag {
            t if t == TAG_POLL => {
                expect_len(data, POLL_LEN)?;
                Ok(Packet::Poll {
                    callsign: parse_callsign(&data[TAG_LEN..TAG_LEN + CALLSIGN_LEN])?,
                })
            }
            t if t == TAG_LOGIN => {
                expect_len(data, LOGIN_LEN)?;
                let callsign = parse_callsign(&data[TAG_LEN..TAG_LEN + CALLSIGN_LEN])?;
                let tgid = u16::from_be_bytes([data[LOGIN_LEN - 2], data[LOGIN_LEN - 1]]);
                Ok(Packet::Login { callsign, tgid })
            }
            t if t == TAG_UNLINK => {
                expect_len(data, UNLINK_LEN)?;
                Ok(Packet::Unlink {
                    callsign: parse_callsign(&data[TAG_LEN..TAG_LEN + CALLSIGN_LEN])?,
                })
            }
            t if t == TAG_DATA => {
                expect_len(data, DATA_LEN)?;
                let callsign = parse_callsign(&data[TAG_LEN..TAG_LEN + CALLSIGN_LEN])?;
                let tgid = u16::from_be_bytes([data[DATA_TGID_OFFSET], data[DATA_TGID_OFFSET + 1]]);
                let token = u32::from_be_bytes([
                    data[DATA_TOKEN_OFFSET],
                    data[DATA_TOKEN_OFFSET + 1],
                    data[DATA_TOKEN_OFFSET + 2],
                    data[DATA_TOKEN_OFFSET + 3],
                ]);
                let position = FramePosition::from_wire(data[DATA_POSITION_OFFSET])
                    .ok_or(ProtocolError::InvalidFramePosition(data[DATA_POSITION_OFFSET]))?;
                Ok(Packet::Data(DataFrame {
                    callsign,
                    tgid,
                    token,
                    position,
                    raw: Bytes::copy_from_slice(data),
                }))
            }
            t if t == TAG_STATUS => {
                expect_len(data, STATUS_QUERY_LEN)?;
                Ok(Packet::StatusQuery)
            }
            _ => Err(ProtocolError::BadMagic),
        }
    }
}

fn expect_len(data: &[u8], expected: usize) -> Result<(), ProtocolError> {
    if data.len() != expected {
        return Err(ProtocolError::BadLength {
            expected,
            actual: data.len(),
        });
    }
    Ok(())
}

fn parse_callsign(field: &[u8]) -> Result<String, ProtocolError> {
    if !field.iter().all(|b| b.is_ascii_graphic() || *b == b' ') {
        return Err(ProtocolError::BadCallsign);
    }
    let s = std::str::from_utf8(field).map_err(|_| ProtocolError::BadCallsign)?;
    let trimmed = s.trim_end();
    if trimmed.is_empty() {
        return Err(ProtocolError::BadCallsign);
    }
    Ok(trimmed.to_string())
}

fn put_padded(buf: &mut BytesMut, text: &str, width: usize) {
    let bytes = text.as_bytes();
    let take = bytes.len().min(width);
    buf.put_slice(&bytes[..take]);
    for _ in take..width {
        buf.put_u8(b' ');
    }
}

/// Encode a poll acknowledgement carrying the reflector callsign
pub fn encode_poll_ack(reflector_callsign: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(POLL_LEN);
    buf.put_slice(TAG_POLL);
    put_padded(&mut buf, reflector_callsign, CALLSIGN_LEN);
    buf.freeze()
}

/// Encode an unlink acknowledgement
pub fn encode_unlink_ack(reflector_callsign: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(UNLINK_LEN);
    buf.put_slice(TAG_UNLINK);
    put_padded(&mut buf, reflector_callsign, CALLSIGN_LEN);
    buf.freeze()
}

/// Encode the status reply
///
/// The hash is derived from the reflector name so repeated queries are
/// stable; the count is zero-padded decimal, clamped to three digits.
pub fn encode_status_reply(name: &str, description: &str, client_count: usize) -> Bytes {
    let mut buf = BytesMut::with_capacity(STATUS_REPLY_LEN);
    buf.put_slice(TAG_STATUS);

    let hash = name_hash(name);
    buf.put_slice(format!("{:05}", hash % 100_000).as_bytes());

    put_padded(&mut buf, name, STATUS_NAME_LEN);
    put_padded(&mut buf, description, STATUS_DESC_LEN);

    let count = client_count.min(999);
    buf.put_slice(format!("{:03}", count).as_bytes());

    buf.freeze()
}

/// Encode a data frame (used by tests and the relay demos)
pub fn encode_data_frame(
    callsign: &str,
    tgid: u16,
    token: u32,
    position: FramePosition,
    payload: &[u8],
) -> Bytes {
    let mut buf = BytesMut::with_capacity(DATA_LEN);
    buf.put_slice(TAG_DATA);
    put_padded(&mut buf, callsign, CALLSIGN_LEN);
    buf.put_u16(tgid);
    buf.put_u32(token);
    buf.put_u8(position.to_wire());
    let take = payload.len().min(DATA_PAYLOAD_LEN);
    buf.put_slice(&payload[..take]);
    for _ in take..DATA_PAYLOAD_LEN {
        buf.put_u8(0);
    }
    buf.freeze()
}

/// Encode a poll packet (client side; used by tests and demos)
pub fn encode_poll(callsign: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(POLL_LEN);
    buf.put_slice(TAG_POLL);
    put_padded(&mut buf, callsign, CALLSIGN_LEN);
    buf.freeze()
}

/// Encode a login packet (client side; used by tests and demos)
pub fn encode_login(callsign: &str, tgid: u16) -> Bytes {
    let mut buf = BytesMut::with_capacity(LOGIN_LEN);
    buf.put_slice(TAG_LOGIN);
    put_padded(&mut buf, callsign, CALLSIGN_LEN);
    buf.put_u16(tgid);
    buf.freeze()
}

/// Encode an unlink packet (client side; used by tests and demos)
pub fn encode_unlink(callsign: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(UNLINK_LEN);
    buf.put_slice(TAG_UNLINK);
    put_padded(&mut buf, callsign, CALLSIGN_LEN);
    buf.freeze()
}

fn name_hash(name: &str) -> u32 {
    // FNV-1a, enough for a stable 5-digit identity
    let mut hash: u32 = 0x811c9dc5;
    for b in name.as_bytes() {
        hash ^= u32::from(*b);
        hash = hash.wrapping_mul(0x01000193);
    }
    hash
}

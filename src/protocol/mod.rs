//! Wire protocol: datagram layout, decoding, and reply encoding
//!
//! Five packet kinds, each introduced by a 4-byte ASCII tag:
//!
//! ```text
//! YSFP  poll / keep-alive     refresh session, acked with reflector callsign
//! YSFL  login                 register callsign + talk-group
//! YSFU  unlink                deregister, acked
//! YSFD  data frame            header / data / terminator of a transmission
//! YSFS  status query          answered with the 42-byte status reply
//! ```
//!
//! Decoding never allocates beyond the parsed callsign and one
//! reference-counted copy of the datagram for relaying. Malformed input is a
//! typed [`ProtocolError`] that the dispatcher converts into a counted drop.

pub mod constants;
pub mod frame;
pub mod packet;

pub use frame::{DataFrame, FramePosition};
pub use packet::{
    encode_data_frame, encode_login, encode_poll, encode_poll_ack, encode_status_reply,
    encode_unlink, encode_unlink_ack, Packet, ProtocolError,
};

//! Wire protocol constants
//!
//! Every datagram starts with a 4-byte ASCII tag. Callsign fields are 10
//! bytes, ASCII, right-padded with spaces. Multi-byte integers are big
//! endian. The layouts below are normative for this implementation.

/// Poll / keep-alive tag
pub const TAG_POLL: &[u8; 4] = b"YSFP";
/// Login / registration tag
pub const TAG_LOGIN: &[u8; 4] = b"YSFL";
/// Unlink tag
pub const TAG_UNLINK: &[u8; 4] = b"YSFU";
/// Data frame tag
pub const TAG_DATA: &[u8; 4] = b"YSFD";
/// Status query tag
pub const TAG_STATUS: &[u8; 4] = b"YSFS";

/// Length of the magic tag
pub const TAG_LEN: usize = 4;

/// Callsign field width (space padded ASCII)
pub const CALLSIGN_LEN: usize = 10;

/// Poll packet: tag + callsign
pub const POLL_LEN: usize = TAG_LEN + CALLSIGN_LEN;

/// Unlink packet: tag + callsign
pub const UNLINK_LEN: usize = TAG_LEN + CALLSIGN_LEN;

/// Login packet: tag + callsign + talk-group (u16 BE)
pub const LOGIN_LEN: usize = TAG_LEN + CALLSIGN_LEN + 2;

/// Voice payload carried by one data frame
pub const DATA_PAYLOAD_LEN: usize = 120;

/// Data frame layout:
///
/// ```text
/// offset  0  tag "YSFD"            (4 bytes)
/// offset  4  source callsign       (10 bytes)
/// offset 14  talk-group id         (u16 BE)
/// offset 16  correlation token     (u32 BE)
/// offset 20  frame position        (u8: 0x00 header, 0x01 data, 0x02 terminator)
/// offset 21  payload               (120 bytes, opaque)
/// ```
pub const DATA_LEN: usize = TAG_LEN + CALLSIGN_LEN + 2 + 4 + 1 + DATA_PAYLOAD_LEN;

/// Offset of the talk-group field in a data frame
pub const DATA_TGID_OFFSET: usize = TAG_LEN + CALLSIGN_LEN;
/// Offset of the correlation token in a data frame
pub const DATA_TOKEN_OFFSET: usize = DATA_TGID_OFFSET + 2;
/// Offset of the frame-position byte in a data frame
pub const DATA_POSITION_OFFSET: usize = DATA_TOKEN_OFFSET + 4;

/// Status query is the bare tag
pub const STATUS_QUERY_LEN: usize = TAG_LEN;

/// Status reply: tag + hash\[5\] + name\[16\] + description\[14\] + count\[3\]
pub const STATUS_HASH_LEN: usize = 5;
/// Width of the reflector name field in a status reply
pub const STATUS_NAME_LEN: usize = 16;
/// Width of the description field in a status reply
pub const STATUS_DESC_LEN: usize = 14;
/// Width of the zero-padded decimal client count
pub const STATUS_COUNT_LEN: usize = 3;
/// Total status reply length (42 bytes)
pub const STATUS_REPLY_LEN: usize =
    TAG_LEN + STATUS_HASH_LEN + STATUS_NAME_LEN + STATUS_DESC_LEN + STATUS_COUNT_LEN;

/// Largest packet we ever accept; recv buffers are sized from this
pub const MAX_DATAGRAM_LEN: usize = 160;

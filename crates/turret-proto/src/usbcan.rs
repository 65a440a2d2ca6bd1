//! USB-CAN bridge framing: the forwarded data frame and the bus-rate command.
//!
//! Data frame layout (30 bytes, multi-byte fields little-endian):
//!
//! ```text
//!  0..2   55 AA        header
//!  2      1E           frame length
//!  3      01           command: forward CAN data frame
//!  4..8   01 00 00 00  repeat count
//!  8..12  0A 00 00 00  interval
//!  12     00           id type: standard
//!  13..17 id           CAN id (u32 LE)
//!  17     00           frame type: data
//!  18     08           data length
//!  19..21 00 00        reserved (IDACC, dataACC)
//!  21..29 payload      pitch, yaw, shoot, idle (u16 LE each)
//!  29     88           trailer
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use crate::{CommandFrame, ProtoError};

pub const DATA_FRAME_LEN: usize = 30;
pub const RATE_FRAME_LEN: usize = 5;

/// Rate index for a 1000 kbps bus.
pub const RATE_1000K: u8 = 0x00;

const HEADER: [u8; 2] = [0x55, 0xAA];
const TRAILER: u8 = 0x88;
const CMD_FORWARD_DATA: u8 = 0x01;
const REPEAT_COUNT: u32 = 1;
const INTERVAL: u32 = 10;
const ID_TYPE_STANDARD: u8 = 0x00;
const FRAME_TYPE_DATA: u8 = 0x00;
const DATA_LEN: u8 = 8;

const ID_OFFSET: usize = 13;
const PAYLOAD_OFFSET: usize = 21;
const TRAILER_OFFSET: usize = DATA_FRAME_LEN - 1;

/// A data frame read back off the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodedCommand {
    pub can_id: u32,
    pub payload: CommandFrame,
}

pub fn encode_command(can_id: u32, cmd: &CommandFrame) -> Bytes {
    let mut buf = BytesMut::with_capacity(DATA_FRAME_LEN);
    buf.put_slice(&HEADER);
    buf.put_u8(DATA_FRAME_LEN as u8);
    buf.put_u8(CMD_FORWARD_DATA);
    buf.put_u32_le(REPEAT_COUNT);
    buf.put_u32_le(INTERVAL);
    buf.put_u8(ID_TYPE_STANDARD);
    buf.put_u32_le(can_id);
    buf.put_u8(FRAME_TYPE_DATA);
    buf.put_u8(DATA_LEN);
    buf.put_u8(0x00);
    buf.put_u8(0x00);
    buf.put_u16_le(cmd.pitch);
    buf.put_u16_le(cmd.yaw);
    buf.put_u16_le(cmd.shoot);
    buf.put_u16_le(cmd.idle);
    buf.put_u8(TRAILER);
    debug_assert_eq!(buf.len(), DATA_FRAME_LEN);
    buf.freeze()
}

/// Parses a data frame produced by [`encode_command`].
///
/// The bridge documentation only pins down the envelope; the payload is read
/// back with the same field order and byte order the encoder uses.
pub fn decode_command(frame: &[u8]) -> Result<DecodedCommand, ProtoError> {
    if frame.len() < DATA_FRAME_LEN {
        return Err(ProtoError::TooShort { got: frame.len(), need: DATA_FRAME_LEN });
    }
    if frame[..2] != HEADER {
        return Err(ProtoError::BadHeader);
    }
    if frame[TRAILER_OFFSET] != TRAILER {
        return Err(ProtoError::BadTrailer(frame[TRAILER_OFFSET]));
    }

    let can_id = u32::from_le_bytes([
        frame[ID_OFFSET],
        frame[ID_OFFSET + 1],
        frame[ID_OFFSET + 2],
        frame[ID_OFFSET + 3],
    ]);
    let le = |at: usize| u16::from_le_bytes([frame[at], frame[at + 1]]);
    let p = PAYLOAD_OFFSET;

    Ok(DecodedCommand {
        can_id,
        payload: CommandFrame { pitch: le(p), yaw: le(p + 2), shoot: le(p + 4), idle: le(p + 6) },
    })
}

pub fn encode_rate_config(rate_index: u8) -> Bytes {
    Bytes::copy_from_slice(&[0x55, 0x05, rate_index, 0xAA, 0x55])
}

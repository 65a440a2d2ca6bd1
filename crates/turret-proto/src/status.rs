//! Status frames reported by the gimbal board through the bridge.
//!
//! The CAN id sits little-endian at offsets 3..5. Payload words, unlike the
//! outbound data frame, arrive high byte first.

use bytes::{BufMut, Bytes, BytesMut};

use crate::{AuxStatus, ProtoError, TelemetryStatus, STATUS_ID};

pub const STATUS_FRAME_MIN_LEN: usize = 15;
pub const AUX_FRAME_MIN_LEN: usize = 13;

const ID_OFFSET: usize = 3;
const PAYLOAD_OFFSET: usize = 7;

fn be(bytes: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([bytes[at], bytes[at + 1]])
}

fn frame_id(bytes: &[u8]) -> u16 {
    u16::from_le_bytes([bytes[ID_OFFSET], bytes[ID_OFFSET + 1]])
}

pub fn filter_can_id(bytes: &[u8], target_id: u32) -> bool {
    bytes.len() >= STATUS_FRAME_MIN_LEN && frame_id(bytes) == (target_id & 0xFFFF) as u16
}

pub fn decode_status_07ff(bytes: &[u8]) -> Result<TelemetryStatus, ProtoError> {
    if bytes.len() < STATUS_FRAME_MIN_LEN {
        return Err(ProtoError::TooShort { got: bytes.len(), need: STATUS_FRAME_MIN_LEN });
    }
    if !filter_can_id(bytes, STATUS_ID) {
        return Err(ProtoError::CanIdMismatch(frame_id(bytes)));
    }

    let p = PAYLOAD_OFFSET;
    Ok(TelemetryStatus {
        pic: be(bytes, p),
        yaw: be(bytes, p + 2),
        shoot: be(bytes, p + 4),
        idle: be(bytes, p + 6),
    })
}

/// Builds a 0x07FF report the way the bridge forwards it. Bytes 0..3 and 5..7
/// are bridge bookkeeping that the decoder never inspects; they are written
/// as a fixed filler. Used by the loopback bridge and bench tooling.
pub fn encode_status_07ff(status: &TelemetryStatus) -> Bytes {
    let mut buf = BytesMut::with_capacity(STATUS_FRAME_MIN_LEN);
    buf.put_slice(&[0xAA, 0x00, 0x08]);
    buf.put_u16_le(STATUS_ID as u16);
    buf.put_slice(&[0x00, 0x00]);
    buf.put_u16(status.pic);
    buf.put_u16(status.yaw);
    buf.put_u16(status.shoot);
    buf.put_u16(status.idle);
    buf.freeze()
}

pub fn decode_status_7fe(bytes: &[u8]) -> Result<AuxStatus, ProtoError> {
    if bytes.len() < AUX_FRAME_MIN_LEN {
        return Err(ProtoError::TooShort { got: bytes.len(), need: AUX_FRAME_MIN_LEN });
    }
    if bytes[ID_OFFSET..ID_OFFSET + 2] != [0xFE, 0x07] {
        return Err(ProtoError::CanIdMismatch(frame_id(bytes)));
    }

    let p = PAYLOAD_OFFSET;
    Ok(AuxStatus { d1: be(bytes, p), d2: be(bytes, p + 2), d3: bytes[p + 4], d4: bytes[p + 5] })
}

//! Transparent-CAN mode frames (`AT` ... `\r\n`).

use bytes::{BufMut, Bytes, BytesMut};

use crate::ProtoError;

const HEADER: [u8; 2] = [0x41, 0x54];
const TRAILER: [u8; 2] = [0x0D, 0x0A];
const MAX_DATA_LEN: usize = 8;
const MIN_ID_DIGITS: usize = 8;

fn strip_prefix(s: &str) -> &str {
    s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")).unwrap_or(s)
}

fn parse_byte(token: &str) -> Result<u8, ProtoError> {
    u8::from_str_radix(strip_prefix(token), 16).map_err(|_| ProtoError::InvalidHex(token.to_string()))
}

/// Encodes a CAN id the way the bridge expects in transparent mode: the id is
/// shifted left by one bit and written as space-separated hex byte pairs.
///
/// `"7FF"` becomes `"00 00 0F FE"`. The value is rendered at least eight
/// digits wide; leading zeros in the input do not widen it, so `"0000000001"`
/// is still `"00 00 00 02"`. A shifted value past 32 bits gets one extra
/// leading zero digit so it still splits into whole bytes.
pub fn hex_to_bin_spaced_hex(hex: &str) -> Result<String, ProtoError> {
    let digits = strip_prefix(hex.trim());
    let value = u64::from_str_radix(digits, 16).map_err(|_| ProtoError::InvalidHex(hex.to_string()))?;
    if value.leading_zeros() == 0 {
        return Err(ProtoError::IdOverflow(digits.to_string()));
    }
    let shifted = value << 1;

    let mut rendered = format!("{:0width$X}", shifted, width = MIN_ID_DIGITS);
    if rendered.len() % 2 == 1 {
        rendered.insert(0, '0');
    }

    let pairs: Vec<&str> = (0..rendered.len()).step_by(2).map(|i| &rendered[i..i + 2]).collect();
    Ok(pairs.join(" "))
}

pub fn encode_transparent(can_id_hex: &str, data_hex: &str) -> Result<Bytes, ProtoError> {
    let id = hex_to_bin_spaced_hex(can_id_hex)?;
    let id_bytes = id.split_whitespace().map(parse_byte).collect::<Result<Vec<_>, _>>()?;
    let data = data_hex.split_whitespace().map(parse_byte).collect::<Result<Vec<_>, _>>()?;
    if data.len() > MAX_DATA_LEN {
        return Err(ProtoError::PayloadTooLong(data.len()));
    }

    let mut buf = BytesMut::with_capacity(HEADER.len() + id_bytes.len() + 1 + data.len() + TRAILER.len());
    buf.put_slice(&HEADER);
    buf.put_slice(&id_bytes);
    buf.put_u8(data.len() as u8);
    buf.put_slice(&data);
    buf.put_slice(&TRAILER);
    Ok(buf.freeze())
}

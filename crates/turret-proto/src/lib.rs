//! Wire formats spoken to the USB-CAN bridge that fronts the gimbal board.
//!
//! Everything here is pure: frames in, frames out, no I/O.

pub mod status;
pub mod transparent;
pub mod usbcan;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use status::{decode_status_07ff, decode_status_7fe, encode_status_07ff, filter_can_id};
pub use transparent::{encode_transparent, hex_to_bin_spaced_hex};
pub use usbcan::{decode_command, encode_command, encode_rate_config, DecodedCommand};

/// Lowest commandable gimbal angle (raw encoder units).
pub const ANGLE_MIN: i32 = 0;
/// Highest commandable gimbal angle; roughly 25 degrees of pitch.
pub const ANGLE_MAX: i32 = 30_000;

/// CAN id the gimbal board listens on for set-point frames.
pub const GIMBAL_SET_ID: u32 = 0x601;
/// CAN id of the gimbal's periodic status report.
pub const STATUS_ID: u32 = 0x07FF;
/// CAN id of the auxiliary status report.
pub const AUX_STATUS_ID: u32 = 0x07FE;

pub fn clamp_angle(angle: i32) -> u16 {
    angle.clamp(ANGLE_MIN, ANGLE_MAX) as u16
}

/// Outbound set-point. This is the only authoritative copy of what the
/// actuators are supposed to be doing; it is re-sent whole on every change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandFrame {
    pub pitch: u16,
    pub yaw: u16,
    /// 0 = hold fire, 1 = fire.
    pub shoot: u16,
    pub idle: u16,
}

impl Default for CommandFrame {
    fn default() -> Self {
        Self { pitch: 11_000, yaw: 20_000, shoot: 0, idle: 0 }
    }
}

impl CommandFrame {
    pub fn is_firing(&self) -> bool {
        self.shoot != 0
    }
}

/// Last status report decoded from a 0x07FF frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryStatus {
    pub pic: u16,
    pub yaw: u16,
    pub shoot: u16,
    pub idle: u16,
}

/// Payload of a 0x7FE frame. Field meaning is defined by the gimbal firmware.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuxStatus {
    pub d1: u16,
    pub d2: u16,
    pub d3: u8,
    pub d4: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtoError {
    #[error("frame too short: {got} bytes, need {need}")]
    TooShort { got: usize, need: usize },
    #[error("bad frame header")]
    BadHeader,
    #[error("bad frame trailer: 0x{0:02X}")]
    BadTrailer(u8),
    #[error("unexpected CAN id 0x{0:04X}")]
    CanIdMismatch(u16),
    #[error("invalid hex: {0:?}")]
    InvalidHex(String),
    #[error("CAN id 0x{0} does not fit after shifting")]
    IdOverflow(String),
    #[error("payload too long: {0} bytes (max 8)")]
    PayloadTooLong(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_angle_bounds() {
        assert_eq!(clamp_angle(-5), 0);
        assert_eq!(clamp_angle(40_000), 30_000);
        assert_eq!(clamp_angle(12_345), 12_345);
    }

    #[test]
    fn default_command_holds_fire() {
        let cmd = CommandFrame::default();
        assert!(!cmd.is_firing());
        assert_eq!(cmd.pitch, 11_000);
        assert_eq!(cmd.yaw, 20_000);
    }
}

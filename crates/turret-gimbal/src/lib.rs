pub mod autodetect;
pub mod controller;
pub mod doctor;
pub mod loopback;
pub mod safety;
pub mod state;
pub mod transport;

use serde::Deserialize;

pub use controller::{GimbalController, GimbalError};
pub use state::LinkStatus;
pub use transport::{Connector, SerialConnector, Transport, TransportError};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GimbalConfig {
    /// Primary bridge port, tried first.
    pub serial_dev: String,
    pub baud: u32,

    /// Tried in order at `baud` when the primary port does not open.
    pub fallback_devs: Vec<String>,

    /// Extra baud rates; every device is retried at each of these.
    pub fallback_bauds: Vec<u32>,

    /// CAN id of the gimbal set-point frame.
    pub can_id: u32,

    /// Bridge bus-rate index sent right after open. 0 = 1000 kbps.
    pub can_rate_index: u8,

    /// Wait between rate config and the first command frame.
    pub settle_ms: u64,

    /// Receive loop cadence.
    pub poll_interval_ms: u64,
    pub rx_buffer_len: usize,

    /// Serial read timeout.
    pub port_timeout_ms: u64,

    /// Talk to an in-memory bridge instead of a serial port.
    pub dry_run: bool,

    /// How long `gimbal probe` waits for a status frame per candidate.
    pub probe_timeout_ms: u64,
}

impl Default for GimbalConfig {
    fn default() -> Self {
        Self {
            serial_dev: "/dev/ttyACM0".into(),
            baud: 115_200,
            fallback_devs: default_fallback_devs(),
            fallback_bauds: Vec::new(),
            can_id: turret_proto::GIMBAL_SET_ID,
            can_rate_index: turret_proto::usbcan::RATE_1000K,
            settle_ms: 100,
            poll_interval_ms: 50,
            rx_buffer_len: 1024,
            port_timeout_ms: 50,
            dry_run: false,
            probe_timeout_ms: 1500,
        }
    }
}

pub fn default_fallback_devs() -> Vec<String> {
    vec![
        "/dev/ttyUSB0".into(),
        "/dev/ttyACM1".into(),
        "/dev/ttyUSB1".into(),
        "COM3".into(),
        "COM4".into(),
    ]
}

/// Ordered (device, baud) pairs to try when opening the bridge: the primary
/// port, the fallback ports at the primary baud, then every port again at each
/// fallback baud. Duplicates are dropped.
pub fn candidate_links(cfg: &GimbalConfig) -> Vec<(String, u32)> {
    let mut devs = vec![cfg.serial_dev.clone()];
    devs.extend(cfg.fallback_devs.iter().cloned());

    let mut bauds = vec![cfg.baud];
    bauds.extend(cfg.fallback_bauds.iter().copied());

    let mut out: Vec<(String, u32)> = Vec::new();
    for baud in bauds {
        for dev in &devs {
            let pair = (dev.clone(), baud);
            if !out.contains(&pair) {
                out.push(pair);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidates_start_with_primary() {
        let cfg = GimbalConfig::default();
        let c = candidate_links(&cfg);
        assert_eq!(c[0], ("/dev/ttyACM0".to_string(), 115_200));
        assert_eq!(c[1], ("/dev/ttyUSB0".to_string(), 115_200));
        assert_eq!(c.last().unwrap().0, "COM4");
        assert_eq!(c.len(), 6);
    }

    #[test]
    fn fallback_bauds_retry_every_device() {
        let cfg = GimbalConfig {
            serial_dev: "/dev/ttyACM0".into(),
            fallback_devs: vec!["/dev/ttyUSB0".into(), "/dev/ttyACM0".into()],
            fallback_bauds: vec![921_600, 115_200],
            ..GimbalConfig::default()
        };
        let c = candidate_links(&cfg);
        assert_eq!(
            c,
            vec![
                ("/dev/ttyACM0".to_string(), 115_200),
                ("/dev/ttyUSB0".to_string(), 115_200),
                ("/dev/ttyACM0".to_string(), 921_600),
                ("/dev/ttyUSB0".to_string(), 921_600),
            ]
        );
    }

    #[test]
    fn empty_section_uses_defaults() {
        let cfg: GimbalConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.can_id, 0x601);
        assert_eq!(cfg.poll_interval_ms, 50);
        assert!(!cfg.dry_run);
    }
}

use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};
use turret_proto::{decode_status_07ff, encode_rate_config, status::STATUS_FRAME_MIN_LEN, TelemetryStatus};

use crate::transport::Connector;

#[derive(Debug, Clone, Serialize)]
pub struct ProbeResult {
    pub dev: String,
    pub baud: u32,
    pub telemetry_seen: bool,
    pub elapsed_ms: u64,
    pub note: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProbeReport {
    pub chosen: Option<(String, u32)>,
    pub first_status: Option<TelemetryStatus>,
    pub probes: Vec<ProbeResult>,
}

/// Opens each candidate in turn, configures the bus rate and waits up to
/// `timeout` for a decodable 0x07FF status frame. Stops at the first hit.
pub fn probe_links(
    connector: &dyn Connector,
    candidates: &[(String, u32)],
    timeout: Duration,
    rate_index: u8,
) -> ProbeReport {
    let mut probes = Vec::new();

    for (dev, baud) in candidates {
        let start = Instant::now();
        let mut seen = None;

        let note = match connector.open(dev, *baud) {
            Ok(mut link) => {
                let note = match link.send(&encode_rate_config(rate_index)) {
                    Ok(()) => {
                        while start.elapsed() < timeout {
                            if link.available_bytes() >= STATUS_FRAME_MIN_LEN {
                                if let Ok(bytes) = link.receive_up_to(1024) {
                                    if let Ok(st) = decode_status_07ff(&bytes) {
                                        seen = Some(st);
                                        break;
                                    }
                                }
                            }
                            std::thread::sleep(Duration::from_millis(25));
                        }
                        if seen.is_some() { "status frame".to_string() } else { "no status frame".to_string() }
                    }
                    Err(e) => format!("rate config failed: {}", e),
                };
                link.close();
                note
            }
            Err(e) => {
                warn!("gimbal probe: dev={} baud={} err={}", dev, baud, e);
                format!("open failed: {}", e)
            }
        };

        probes.push(ProbeResult {
            dev: dev.clone(),
            baud: *baud,
            telemetry_seen: seen.is_some(),
            elapsed_ms: start.elapsed().as_millis() as u64,
            note,
        });

        if seen.is_some() {
            info!("gimbal probe: OK {} @ {}", dev, baud);
            return ProbeReport { chosen: Some((dev.clone(), *baud)), first_status: seen, probes };
        }
    }

    ProbeReport { chosen: None, first_status: None, probes }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::Loopback;
    use turret_proto::encode_status_07ff;

    fn cands(list: &[&str]) -> Vec<(String, u32)> {
        list.iter().map(|d| (d.to_string(), 115_200)).collect()
    }

    #[test]
    fn silent_ports_are_recorded() {
        let lb = Loopback::with_ports(&["/dev/ttyACM0"]);
        let report = probe_links(&lb, &cands(&["/dev/ttyUSB0", "/dev/ttyACM0"]), Duration::from_millis(60), 0);
        assert!(report.chosen.is_none());
        assert_eq!(report.probes.len(), 2);
        assert!(report.probes[0].note.starts_with("open failed"));
        assert_eq!(report.probes[1].note, "no status frame");
        assert_eq!(lb.close_count(), 1);
    }

    #[test]
    fn stops_at_first_port_with_status() {
        let lb = Loopback::new();
        let st = TelemetryStatus { pic: 1, yaw: 2, shoot: 0, idle: 0 };
        lb.push_inbound(&encode_status_07ff(&st));

        let report = probe_links(&lb, &cands(&["/dev/ttyACM0", "/dev/ttyUSB0"]), Duration::from_millis(500), 0);
        assert_eq!(report.chosen, Some(("/dev/ttyACM0".to_string(), 115_200)));
        assert_eq!(report.first_status, Some(st));
        assert_eq!(report.probes.len(), 1);
        assert_eq!(&lb.sent()[0][..], &[0x55, 0x05, 0x00, 0xAA, 0x55]);
    }
}

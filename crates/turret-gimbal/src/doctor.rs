use anyhow::Result;

use crate::GimbalConfig;

pub fn check_gimbal(cfg: &GimbalConfig) -> Result<()> {
    if !cfg.dry_run {
        anyhow::ensure!(!cfg.serial_dev.trim().is_empty(), "gimbal.serial_dev is empty");
    }
    anyhow::ensure!(cfg.baud >= 9_600, "gimbal.baud too low");
    anyhow::ensure!(cfg.fallback_bauds.iter().all(|b| *b >= 9_600), "gimbal.fallback_bauds has a rate below 9600");
    anyhow::ensure!(cfg.can_id <= 0x7FF, "gimbal.can_id must be a standard 11-bit id");
    anyhow::ensure!(cfg.poll_interval_ms >= 1 && cfg.poll_interval_ms <= 1_000, "gimbal.poll_interval_ms should be 1..1000");
    anyhow::ensure!(
        cfg.rx_buffer_len >= turret_proto::status::STATUS_FRAME_MIN_LEN,
        "gimbal.rx_buffer_len smaller than a status frame"
    );
    anyhow::ensure!(cfg.port_timeout_ms >= 1, "gimbal.port_timeout_ms must be > 0");
    anyhow::ensure!(cfg.settle_ms <= 5_000, "gimbal.settle_ms unreasonably long");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass() {
        check_gimbal(&GimbalConfig::default()).unwrap();
    }

    #[test]
    fn extended_id_rejected() {
        let cfg = GimbalConfig { can_id: 0x1FFF_FFFF, ..GimbalConfig::default() };
        assert!(check_gimbal(&cfg).is_err());
    }

    #[test]
    fn tiny_rx_buffer_rejected() {
        let cfg = GimbalConfig { rx_buffer_len: 8, ..GimbalConfig::default() };
        assert!(check_gimbal(&cfg).is_err());
    }
}

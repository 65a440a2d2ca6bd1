use anyhow::Result;
use turret_proto::{ANGLE_MAX, ANGLE_MIN};

use crate::elevation::ElevationTable;
use crate::firing::FiringConfig;
use crate::patrol::PatrolConfig;
use crate::targeting::TargetingConfig;

pub fn check_patrol(cfg: &PatrolConfig) -> Result<()> {
    anyhow::ensure!(cfg.range > 0, "patrol.range must be > 0");
    anyhow::ensure!(
        cfg.right_limit() >= ANGLE_MIN && cfg.left_limit() <= ANGLE_MAX,
        "patrol limits {}..{} outside 0..30000",
        cfg.right_limit(),
        cfg.left_limit()
    );
    anyhow::ensure!(cfg.step > 0 && cfg.min_step > 0, "patrol.step and patrol.min_step must be > 0");
    anyhow::ensure!(cfg.min_step <= cfg.step, "patrol.min_step larger than patrol.step");
    anyhow::ensure!(cfg.decel_zone > 0 && cfg.decel_zone <= cfg.range, "patrol.decel_zone should be 1..range");
    anyhow::ensure!(cfg.tick_ms >= 1, "patrol.tick_ms must be > 0");
    Ok(())
}

pub fn check_targeting(cfg: &TargetingConfig) -> Result<()> {
    anyhow::ensure!(cfg.lost_timeout_ms >= 1, "targeting.lost_timeout_ms must be > 0");
    anyhow::ensure!(cfg.center_margin >= 0, "targeting.center_margin must be >= 0");
    anyhow::ensure!(cfg.yaw_step > 0 && cfg.yaw_step <= 1_000, "targeting.yaw_step should be 1..1000");
    anyhow::ensure!((0.0..=1.0).contains(&cfg.min_confidence), "targeting.min_confidence should be 0..1");
    Ok(())
}

pub fn check_firing(cfg: &FiringConfig) -> Result<()> {
    anyhow::ensure!(cfg.pulse_on_ms >= 1, "firing.pulse_on_ms must be > 0");
    anyhow::ensure!(cfg.pulse_off_ms >= 1, "firing.pulse_off_ms must be > 0");
    Ok(())
}

pub fn check_elevation(table: &ElevationTable) -> Result<()> {
    for (name, pitch) in table.iter() {
        anyhow::ensure!(
            (ANGLE_MIN..=ANGLE_MAX).contains(&pitch),
            "elevation.{} = {} outside 0..30000",
            name,
            pitch
        );
    }
    Ok(())
}

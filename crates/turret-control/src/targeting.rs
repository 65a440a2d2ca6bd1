//! Per-frame targeting decision.
//!
//! [`Targeter::tick`] is pure apart from logging: it mutates the lock state it
//! is handed and returns the gimbal commands to issue. Time comes in as an
//! argument so the hysteresis and duty cycle can be driven from tests.

use std::collections::HashSet;
use std::fmt;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tracing::{debug, info, warn};
use turret_proto::{ANGLE_MAX, ANGLE_MIN};
use turret_vision::Detection;

use crate::elevation::ElevationTable;
use crate::firing::FiringConfig;
use crate::state::TargetLockState;
use crate::Faction;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TargetingConfig {
    pub faction: Faction,
    /// Detections below this confidence are ignored.
    pub min_confidence: f32,
    /// Time without a target before a lock is dropped.
    pub lost_timeout_ms: u64,
    /// Pixels either side of the frame center that count as on target.
    pub center_margin: i32,
    /// Yaw nudge per frame while off center.
    pub yaw_step: i32,
    pub grab_timeout_ms: u64,
    /// Pause after each processed frame.
    pub frame_pause_ms: u64,
}

impl Default for TargetingConfig {
    fn default() -> Self {
        Self {
            faction: Faction::Red,
            min_confidence: 0.3,
            lost_timeout_ms: 1_000,
            center_margin: 100,
            yaw_step: 25,
            grab_timeout_ms: 1_000,
            frame_pause_ms: 10,
        }
    }
}

impl TargetingConfig {
    pub fn lost_timeout(&self) -> Duration {
        Duration::from_millis(self.lost_timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TargetingPhase {
    Patrolling,
    Adjusting,
    Centered { firing: bool },
    ConfirmingLoss { remaining: Duration },
}

impl TargetingPhase {
    /// Stable name, ignoring the countdown and trigger state.
    pub fn kind(&self) -> &'static str {
        match self {
            TargetingPhase::Patrolling => "patrolling",
            TargetingPhase::Adjusting => "adjusting",
            TargetingPhase::Centered { .. } => "centered",
            TargetingPhase::ConfirmingLoss { .. } => "confirming-loss",
        }
    }
}

impl fmt::Display for TargetingPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetingPhase::Patrolling => f.write_str("patrolling"),
            TargetingPhase::Adjusting => f.write_str("adjusting"),
            TargetingPhase::Centered { firing: true } => f.write_str("centered, firing"),
            TargetingPhase::Centered { firing: false } => f.write_str("centered, standby"),
            TargetingPhase::ConfirmingLoss { remaining } => {
                write!(f, "confirming loss ({:.1}s)", remaining.as_secs_f32())
            }
        }
    }
}

/// Commands produced by one tick. `None` leaves that axis alone.
#[derive(Debug, Clone, PartialEq)]
pub struct AimCommand {
    pub pitch: Option<i32>,
    pub yaw: Option<i32>,
    pub shoot: Option<bool>,
    pub phase: TargetingPhase,
}

pub struct Targeter {
    cfg: TargetingConfig,
    firing: FiringConfig,
    elevation: ElevationTable,
    missing_elevation: HashSet<String>,
}

impl Targeter {
    pub fn new(cfg: TargetingConfig, firing: FiringConfig, elevation: ElevationTable) -> Self {
        Self { cfg, firing, elevation, missing_elevation: HashSet::new() }
    }

    pub fn config(&self) -> &TargetingConfig {
        &self.cfg
    }

    /// Highest-confidence detection of our faction; the first one wins a tie.
    pub fn select<'a>(&self, dets: &'a [Detection]) -> Option<&'a Detection> {
        let mut best: Option<&Detection> = None;
        for d in dets {
            if !self.cfg.faction.matches(d.class_id) || d.confidence < self.cfg.min_confidence {
                continue;
            }
            best = match best {
                Some(b) if b.confidence >= d.confidence => Some(b),
                _ => Some(d),
            };
        }
        best
    }

    pub fn tick(
        &mut self,
        st: &mut TargetLockState,
        dets: &[Detection],
        frame_width: u32,
        now: Instant,
    ) -> AimCommand {
        let Some(best) = self.select(dets) else {
            return self.on_miss(st, now);
        };

        let deviation = best.center_x() as i64 - (frame_width / 2) as i64;
        let centered = deviation.abs() <= self.cfg.center_margin as i64;

        if !st.locked {
            info!(
                "target: {} {} acquired (conf {:.2}, deviation {})",
                self.cfg.faction, best.class_name, best.confidence, deviation
            );
            st.lock_started = Some(now);
            st.shooting = false;
            st.last_pulse_switch = None;
        }
        st.locked = true;
        st.lost_since = None;

        let pitch = match self.elevation.get(&best.class_name) {
            Some(p) => Some(p),
            None => {
                if self.missing_elevation.insert(best.class_name.clone()) {
                    warn!("target: no elevation for class {:?}, pitch unchanged", best.class_name);
                }
                None
            }
        };

        let yaw = if centered {
            None
        } else {
            let step = if deviation > 0 { -self.cfg.yaw_step } else { self.cfg.yaw_step };
            st.current_yaw = (st.current_yaw + step).clamp(ANGLE_MIN, ANGLE_MAX);
            Some(st.current_yaw)
        };

        let lock_age = st.lock_started.map(|t| now.saturating_duration_since(t)).unwrap_or_default();
        let may_fire = self.firing.enable && centered && lock_age >= self.firing.pre_fire_delay();

        let (shoot, phase) = if may_fire {
            match self.firing.next_toggle(st.shooting, st.last_pulse_switch, now) {
                Some(on) => {
                    st.shooting = on;
                    st.last_pulse_switch = Some(now);
                    debug!("target: trigger {}", if on { "on" } else { "off" });
                    (Some(on), TargetingPhase::Centered { firing: on })
                }
                None => (None, TargetingPhase::Centered { firing: st.shooting }),
            }
        } else {
            st.shooting = false;
            let phase = if centered { TargetingPhase::Centered { firing: false } } else { TargetingPhase::Adjusting };
            (Some(false), phase)
        };

        AimCommand { pitch, yaw, shoot, phase }
    }

    /// A tick with nothing to aim at: the trigger drops and the loss timer runs.
    /// Also used when no frame or no detection result is available.
    pub fn on_miss(&mut self, st: &mut TargetLockState, now: Instant) -> AimCommand {
        st.shooting = false;

        let phase = if st.locked {
            let since = *st.lost_since.get_or_insert(now);
            let gone = now.saturating_duration_since(since);
            let timeout = self.cfg.lost_timeout();
            if gone > timeout {
                st.locked = false;
                st.lost_since = None;
                st.lock_started = None;
                info!("target: lost for {:.1}s, resuming patrol", gone.as_secs_f32());
                TargetingPhase::Patrolling
            } else {
                TargetingPhase::ConfirmingLoss { remaining: timeout - gone }
            }
        } else {
            st.lost_since = None;
            TargetingPhase::Patrolling
        };

        AimCommand { pitch: None, yaw: None, shoot: Some(false), phase }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WIDTH: u32 = 1280;

    fn det(class_id: i32, name: &str, center_x: i32, confidence: f32) -> Detection {
        Detection {
            x1: center_x - 20,
            y1: 100,
            x2: center_x + 20,
            y2: 160,
            confidence,
            class_id,
            class_name: name.into(),
        }
    }

    fn targeter() -> Targeter {
        Targeter::new(TargetingConfig::default(), FiringConfig::default(), ElevationTable::default())
    }

    #[test]
    fn picks_highest_confidence_of_own_faction() {
        let t = targeter();
        let dets = vec![
            det(1, "blue200", 640, 0.99),
            det(6, "red200", 600, 0.70),
            det(7, "red300", 700, 0.80),
            det(8, "red400", 500, 0.80),
        ];
        let best = t.select(&dets).unwrap();
        assert_eq!(best.class_name, "red300");
    }

    #[test]
    fn low_confidence_is_ignored() {
        let t = targeter();
        assert!(t.select(&[det(6, "red200", 640, 0.1)]).is_none());
    }

    #[test]
    fn off_center_nudges_yaw_against_deviation() {
        let mut t = targeter();
        let mut st = TargetLockState::new(15_000);
        let now = Instant::now();

        // target right of center -> yaw decreases
        let cmd = t.tick(&mut st, &[det(6, "red200", 900, 0.9)], WIDTH, now);
        assert_eq!(cmd.yaw, Some(14_975));
        assert_eq!(cmd.pitch, Some(10_000));
        assert_eq!(cmd.shoot, Some(false));
        assert_eq!(cmd.phase, TargetingPhase::Adjusting);
        assert!(st.locked);

        let cmd = t.tick(&mut st, &[det(6, "red200", 300, 0.9)], WIDTH, now);
        assert_eq!(cmd.yaw, Some(15_000));
    }

    #[test]
    fn yaw_nudge_is_clamped() {
        let mut t = targeter();
        let mut st = TargetLockState::new(30_000);
        let cmd = t.tick(&mut st, &[det(6, "red200", 100, 0.9)], WIDTH, Instant::now());
        assert_eq!(cmd.yaw, Some(30_000));
    }

    #[test]
    fn margin_edge_counts_as_centered() {
        let mut t = targeter();
        let mut st = TargetLockState::new(15_000);
        let cmd = t.tick(&mut st, &[det(6, "red200", 740, 0.9)], WIDTH, Instant::now());
        assert_eq!(cmd.yaw, None);
        assert_eq!(cmd.phase, TargetingPhase::Centered { firing: true });
    }

    #[test]
    fn far_off_frame_box_still_nudges() {
        let mut t = targeter();
        let mut st = TargetLockState::new(15_000);
        let d = Detection { x1: i32::MIN, x2: i32::MIN + 40, ..det(6, "red200", 0, 0.9) };
        let cmd = t.tick(&mut st, &[d], u32::MAX, Instant::now());
        assert_eq!(cmd.yaw, Some(15_025));
        assert_eq!(cmd.phase, TargetingPhase::Adjusting);
    }

    #[test]
    fn unknown_class_keeps_pitch() {
        let mut t = targeter();
        let mut st = TargetLockState::new(15_000);
        let cmd = t.tick(&mut st, &[det(9, "red999", 640, 0.9)], WIDTH, Instant::now());
        assert_eq!(cmd.pitch, None);
        assert!(st.locked);
    }

    #[test]
    fn pre_fire_delay_holds_trigger() {
        let firing = FiringConfig { pre_fire_delay_ms: 300, ..FiringConfig::default() };
        let mut t = Targeter::new(TargetingConfig::default(), firing, ElevationTable::default());
        let mut st = TargetLockState::new(15_000);
        let t0 = Instant::now();
        let d = [det(6, "red200", 640, 0.9)];

        let cmd = t.tick(&mut st, &d, WIDTH, t0);
        assert_eq!(cmd.shoot, Some(false));
        let cmd = t.tick(&mut st, &d, WIDTH, t0 + Duration::from_millis(300));
        assert_eq!(cmd.shoot, Some(true));
    }

    #[test]
    fn disabled_firing_never_shoots() {
        let firing = FiringConfig { enable: false, ..FiringConfig::default() };
        let mut t = Targeter::new(TargetingConfig::default(), firing, ElevationTable::default());
        let mut st = TargetLockState::new(15_000);
        let cmd = t.tick(&mut st, &[det(6, "red200", 640, 0.9)], WIDTH, Instant::now());
        assert_eq!(cmd.shoot, Some(false));
        assert!(!st.shooting);
    }

    #[test]
    fn loss_is_confirmed_before_unlock() {
        let mut t = targeter();
        let mut st = TargetLockState::new(15_000);
        let t0 = Instant::now();
        t.tick(&mut st, &[det(6, "red200", 640, 0.9)], WIDTH, t0);
        assert!(st.shooting);

        let cmd = t.tick(&mut st, &[], WIDTH, t0 + Duration::from_millis(100));
        assert_eq!(cmd.shoot, Some(false));
        assert!(!st.shooting);
        assert_eq!(cmd.phase, TargetingPhase::ConfirmingLoss { remaining: Duration::from_secs(1) });

        let cmd = t.tick(&mut st, &[], WIDTH, t0 + Duration::from_millis(600));
        assert_eq!(cmd.phase, TargetingPhase::ConfirmingLoss { remaining: Duration::from_millis(500) });
        assert!(st.locked);

        // exactly at the timeout is still confirming
        let cmd = t.tick(&mut st, &[], WIDTH, t0 + Duration::from_millis(1_100));
        assert!(matches!(cmd.phase, TargetingPhase::ConfirmingLoss { .. }));

        let cmd = t.tick(&mut st, &[], WIDTH, t0 + Duration::from_millis(1_101));
        assert_eq!(cmd.phase, TargetingPhase::Patrolling);
        assert!(!st.locked);
    }

    #[test]
    fn reacquire_clears_loss_timer() {
        let mut t = targeter();
        let mut st = TargetLockState::new(15_000);
        let t0 = Instant::now();
        let d = [det(6, "red200", 640, 0.9)];
        t.tick(&mut st, &d, WIDTH, t0);
        t.tick(&mut st, &[], WIDTH, t0 + Duration::from_millis(500));
        t.tick(&mut st, &d, WIDTH, t0 + Duration::from_millis(900));
        assert!(st.lost_since.is_none());

        let cmd = t.tick(&mut st, &[], WIDTH, t0 + Duration::from_millis(1_700));
        assert!(matches!(cmd.phase, TargetingPhase::ConfirmingLoss { .. }));
    }

    #[test]
    fn phase_display() {
        assert_eq!(TargetingPhase::Centered { firing: true }.to_string(), "centered, firing");
        let p = TargetingPhase::ConfirmingLoss { remaining: Duration::from_millis(400) };
        assert_eq!(p.to_string(), "confirming loss (0.4s)");
        assert_eq!(p.kind(), "confirming-loss");
    }
}

//! Yaw sweep between two limits while nothing is locked.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info};

use crate::state::SharedState;
use crate::GimbalDriver;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PatrolConfig {
    pub enable: bool,
    pub center: i32,
    /// Sweep half-width; limits are `center ± range`.
    pub range: i32,
    pub step: i32,
    pub min_step: i32,
    /// Distance from a limit where the step starts shrinking.
    pub decel_zone: i32,
    pub tick_ms: u64,
}

impl Default for PatrolConfig {
    fn default() -> Self {
        Self { enable: true, center: 15_000, range: 13_000, step: 50, min_step: 30, decel_zone: 500, tick_ms: 30 }
    }
}

impl PatrolConfig {
    /// Upper yaw limit (the sweep's left end).
    pub fn left_limit(&self) -> i32 {
        self.center + self.range
    }

    pub fn right_limit(&self) -> i32 {
        self.center - self.range
    }
}

#[derive(Debug, Clone)]
pub struct Patrol {
    cfg: PatrolConfig,
    /// +1 towards the left limit, -1 towards the right.
    direction: i32,
}

impl Patrol {
    pub fn new(cfg: PatrolConfig) -> Self {
        Self { cfg, direction: 1 }
    }

    pub fn direction(&self) -> i32 {
        self.direction
    }

    /// Next yaw from `current_yaw`, eased near the limit being approached.
    pub fn step(&mut self, current_yaw: i32) -> i32 {
        let left = self.cfg.left_limit();
        let right = self.cfg.right_limit();

        let distance = if self.direction > 0 { left - current_yaw } else { current_yaw - right };
        let mut step = self.cfg.step;
        if self.cfg.decel_zone > 0 && distance < self.cfg.decel_zone {
            let factor = (distance as f64 / self.cfg.decel_zone as f64).max(0.1);
            step = self.cfg.min_step.max((self.cfg.step as f64 * factor) as i32);
        }

        let mut next = current_yaw + step * self.direction;
        if next >= left {
            next = left;
            self.direction = -1;
            info!("patrol: left limit {} reached, sweeping right", left);
        } else if next <= right {
            next = right;
            self.direction = 1;
            info!("patrol: right limit {} reached, sweeping left", right);
        }
        next
    }
}

/// Sweeps until the shared running flag drops. Idle ticks while locked.
pub fn run_patrol_loop(shared: Arc<SharedState>, gimbal: Arc<dyn GimbalDriver>, cfg: PatrolConfig) {
    info!("patrol: started, limits {}..{}", cfg.right_limit(), cfg.left_limit());
    let tick = Duration::from_millis(cfg.tick_ms);
    let enabled = cfg.enable;
    let mut patrol = Patrol::new(cfg);

    while shared.is_running() {
        if enabled {
            // The write stays under the lock so a sweep step can never reach
            // the gimbal after targeting has taken over.
            let mut st = shared.lock();
            if !st.locked {
                let yaw = patrol.step(st.current_yaw);
                st.current_yaw = yaw;
                if let Err(e) = gimbal.set_yaw(yaw) {
                    debug!("patrol: set_yaw({}) failed: {}", yaw, e);
                }
            }
        }
        thread::sleep(tick);
    }
    info!("patrol: stopped");
}

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};
use turret_gimbal::safety::RateLimit;
use turret_vision::{Detection, Detector, FrameSource};

use crate::state::SharedState;
use crate::targeting::{AimCommand, Targeter};
use crate::GimbalDriver;

const MISS_BACKOFF: Duration = Duration::from_millis(100);

/// Frames-per-second estimate refreshed every `every` frames.
#[derive(Debug)]
pub struct FpsMeter {
    every: u32,
    count: u32,
    last: Instant,
}

impl FpsMeter {
    pub fn new(every: u32, now: Instant) -> Self {
        Self { every: every.max(1), count: 0, last: now }
    }

    pub fn tick(&mut self, now: Instant) -> Option<f64> {
        self.count += 1;
        if self.count % self.every != 0 {
            return None;
        }
        let elapsed = now.saturating_duration_since(self.last);
        self.last = now;
        if elapsed.is_zero() {
            return None;
        }
        Some(self.every as f64 / elapsed.as_secs_f64())
    }
}

/// Runs one targeting decision under the shared lock and sends the result.
pub fn process_detections(
    shared: &SharedState,
    gimbal: &dyn GimbalDriver,
    targeter: &mut Targeter,
    dets: &[Detection],
    frame_width: u32,
    now: Instant,
) -> AimCommand {
    let cmd = {
        let mut st = shared.lock();
        targeter.tick(&mut st, dets, frame_width, now)
    };
    apply(gimbal, &cmd);
    cmd
}

/// Same as an empty detection list: the trigger goes off and a held lock
/// starts (or keeps) timing out.
pub fn process_miss(
    shared: &SharedState,
    gimbal: &dyn GimbalDriver,
    targeter: &mut Targeter,
    now: Instant,
) -> AimCommand {
    let cmd = {
        let mut st = shared.lock();
        targeter.on_miss(&mut st, now)
    };
    apply(gimbal, &cmd);
    cmd
}

fn apply(gimbal: &dyn GimbalDriver, cmd: &AimCommand) {
    if let Some(p) = cmd.pitch {
        if let Err(e) = gimbal.set_pitch(p) {
            debug!("target: set_pitch({}) failed: {}", p, e);
        }
    }
    if let Some(y) = cmd.yaw {
        if let Err(e) = gimbal.set_yaw(y) {
            debug!("target: set_yaw({}) failed: {}", y, e);
        }
    }
    let shot = match cmd.shoot {
        Some(true) => gimbal.trigger_shoot(),
        Some(false) => gimbal.stop_shoot(),
        None => Ok(()),
    };
    if let Err(e) = shot {
        debug!("target: trigger update failed: {}", e);
    }
}

fn log_phase(cmd: &AimCommand, last_kind: &mut &'static str) {
    if cmd.phase.kind() != *last_kind {
        info!("target: {}", cmd.phase);
        *last_kind = cmd.phase.kind();
    }
}

/// Pulls frames until the running flag drops, then forces the trigger off.
pub fn run_targeting_loop(
    shared: Arc<SharedState>,
    gimbal: Arc<dyn GimbalDriver>,
    mut source: Box<dyn FrameSource>,
    mut detector: Box<dyn Detector>,
    mut targeter: Targeter,
) {
    let cfg = targeter.config().clone();
    info!("target: started, faction {}", cfg.faction);

    let grab_timeout = Duration::from_millis(cfg.grab_timeout_ms);
    let pause = Duration::from_millis(cfg.frame_pause_ms);
    let mut fps = FpsMeter::new(10, Instant::now());
    let mut warn_limit = RateLimit::new(Duration::from_secs(5));
    let mut last_kind = "";

    while shared.is_running() {
        let Some(frame) = source.grab(grab_timeout) else {
            if warn_limit.allow() {
                warn!("target: no frame from source");
            }
            let cmd = process_miss(&shared, gimbal.as_ref(), &mut targeter, Instant::now());
            log_phase(&cmd, &mut last_kind);
            thread::sleep(MISS_BACKOFF);
            continue;
        };

        let dets = match detector.detect(&frame) {
            Ok(d) => d,
            Err(e) => {
                if warn_limit.allow() {
                    warn!("target: detector failed on frame {}: {:#}", frame.seq, e);
                }
                let cmd = process_miss(&shared, gimbal.as_ref(), &mut targeter, Instant::now());
                log_phase(&cmd, &mut last_kind);
                thread::sleep(MISS_BACKOFF);
                continue;
            }
        };

        let now = Instant::now();
        if let Some(rate) = fps.tick(now) {
            debug!("target: {:.1} fps, {} detections", rate, dets.len());
        }

        let cmd = process_detections(&shared, gimbal.as_ref(), &mut targeter, &dets, frame.width, now);
        log_phase(&cmd, &mut last_kind);

        if !pause.is_zero() {
            thread::sleep(pause);
        }
    }

    shared.lock().shooting = false;
    if let Err(e) = gimbal.stop_shoot() {
        warn!("target: final shoot-off failed: {}", e);
    }
    info!("target: stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fps_reports_every_tenth_frame() {
        let t0 = Instant::now();
        let mut m = FpsMeter::new(10, t0);
        for i in 1..10 {
            assert!(m.tick(t0 + Duration::from_millis(i * 50)).is_none());
        }
        let fps = m.tick(t0 + Duration::from_millis(500)).unwrap();
        assert!((fps - 20.0).abs() < 1e-9);
    }
}

//! Gimbal command/telemetry controller.
//!
//! Holds the authoritative [`CommandFrame`] and the last decoded
//! [`TelemetryStatus`]. Every setter re-sends the whole frame. A background
//! thread polls the bridge for 0x07FF status reports.
//!
//! Lock order is command -> link -> counters. The receive thread only takes
//! the link and then, after releasing it, the snapshots.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, trace, warn};
use turret_proto::status::STATUS_FRAME_MIN_LEN;
use turret_proto::{
    clamp_angle, decode_status_07ff, decode_status_7fe, encode_command, encode_rate_config, AuxStatus,
    CommandFrame, ProtoError, TelemetryStatus,
};

use crate::safety::RateLimit;
use crate::state::LinkStatus;
use crate::transport::{Connector, Transport, TransportError};
use crate::{candidate_links, GimbalConfig};

#[derive(Debug, Error)]
pub enum GimbalError {
    #[error("no gimbal port could be opened (tried {tried})")]
    NoPort { tried: String },
    #[error("gimbal link not initialized")]
    NotInitialized,
    #[error("rate config send failed: {0}")]
    RateConfig(#[source] TransportError),
    #[error("spawn receive thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Shared {
    link: Mutex<Option<Box<dyn Transport>>>,
    command: Mutex<CommandFrame>,
    telemetry: Mutex<TelemetryStatus>,
    aux: Mutex<Option<AuxStatus>>,
    status: Mutex<LinkStatus>,
    running: AtomicBool,
    send_warn: Mutex<RateLimit>,
}

pub struct GimbalController {
    cfg: GimbalConfig,
    shared: Arc<Shared>,
    rx_thread: Mutex<Option<JoinHandle<()>>>,
}

impl GimbalController {
    pub fn new(cfg: GimbalConfig) -> Self {
        Self {
            cfg,
            shared: Arc::new(Shared {
                link: Mutex::new(None),
                command: Mutex::new(CommandFrame::default()),
                telemetry: Mutex::new(TelemetryStatus::default()),
                aux: Mutex::new(None),
                status: Mutex::new(LinkStatus::default()),
                running: AtomicBool::new(false),
                send_warn: Mutex::new(RateLimit::new(Duration::from_secs(2))),
            }),
            rx_thread: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &GimbalConfig {
        &self.cfg
    }

    /// Opens the first candidate port that works, configures the bus rate,
    /// writes a shoot-off frame and starts the receive thread.
    pub fn initialize(&self, connector: &dyn Connector) -> Result<(), GimbalError> {
        if lock(&self.shared.link).is_some() {
            warn!("gimbal: initialize called twice, ignoring");
            return Ok(());
        }

        let mut tried = Vec::new();
        let mut opened = None;
        for (dev, baud) in candidate_links(&self.cfg) {
            match connector.open(&dev, baud) {
                Ok(t) => {
                    opened = Some((t, dev, baud));
                    break;
                }
                Err(e) => {
                    debug!("gimbal: {}", e);
                    tried.push(format!("{}@{}", dev, baud));
                }
            }
        }
        let Some((mut link, dev, baud)) = opened else {
            return Err(GimbalError::NoPort { tried: tried.join(", ") });
        };
        if !tried.is_empty() {
            warn!("gimbal: primary port unavailable, fell back to {} @ {}", dev, baud);
        }

        if let Err(e) = link.flush() {
            debug!("gimbal: input flush failed: {}", e);
        }
        if let Err(e) = link.send(&encode_rate_config(self.cfg.can_rate_index)) {
            link.close();
            return Err(GimbalError::RateConfig(e));
        }
        info!("gimbal: opened {} @ {}, bus rate index {}", dev, baud, self.cfg.can_rate_index);

        *lock(&self.shared.link) = Some(link);
        {
            let mut st = lock(&self.shared.status);
            st.connected = true;
            st.port = Some(dev);
            st.baud = Some(baud);
        }

        thread::sleep(Duration::from_millis(self.cfg.settle_ms));

        if let Err(e) = self.update(|c| c.shoot = 0) {
            warn!("gimbal: initial shoot-off not sent: {}", e);
        }

        self.shared.running.store(true, Ordering::SeqCst);
        let shared = self.shared.clone();
        let poll = Duration::from_millis(self.cfg.poll_interval_ms);
        let max_len = self.cfg.rx_buffer_len;
        let handle = thread::Builder::new()
            .name("gimbal-rx".into())
            .spawn(move || receive_loop(shared, poll, max_len))
            .map_err(|e| {
                self.shared.running.store(false, Ordering::SeqCst);
                GimbalError::Spawn(e)
            })?;
        *lock(&self.rx_thread) = Some(handle);
        Ok(())
    }

    pub fn set_pitch(&self, angle: i32) -> Result<(), GimbalError> {
        self.update(|c| c.pitch = clamp_angle(angle))
    }

    pub fn set_yaw(&self, angle: i32) -> Result<(), GimbalError> {
        self.update(|c| c.yaw = clamp_angle(angle))
    }

    pub fn set_idle(&self, angle: i32) -> Result<(), GimbalError> {
        self.update(|c| c.idle = clamp_angle(angle))
    }

    pub fn set_shoot(&self, on: bool) -> Result<(), GimbalError> {
        self.update(|c| c.shoot = u16::from(on))
    }

    pub fn trigger_shoot(&self) -> Result<(), GimbalError> {
        self.set_shoot(true)
    }

    pub fn stop_shoot(&self) -> Result<(), GimbalError> {
        self.set_shoot(false)
    }

    /// Re-sends the current command state. No retry on failure; the next
    /// setter call sends the full state again.
    pub fn send_command(&self) -> Result<(), GimbalError> {
        let cmd = lock(&self.shared.command);
        self.send_frame(&cmd)
    }

    /// Writes pre-built bytes (e.g. a transparent-CAN frame) to the bridge.
    pub fn send_raw(&self, bytes: &[u8]) -> Result<(), GimbalError> {
        let mut link = lock(&self.shared.link);
        let t = link.as_mut().ok_or(GimbalError::NotInitialized)?;
        t.send(bytes)?;
        trace!("gimbal: raw tx {}", hex::encode(bytes));
        Ok(())
    }

    pub fn status_snapshot(&self) -> TelemetryStatus {
        *lock(&self.shared.telemetry)
    }

    pub fn aux_snapshot(&self) -> Option<AuxStatus> {
        *lock(&self.shared.aux)
    }

    pub fn commanded(&self) -> CommandFrame {
        *lock(&self.shared.command)
    }

    pub fn link_status(&self) -> LinkStatus {
        lock(&self.shared.status).clone()
    }

    pub fn is_open(&self) -> bool {
        lock(&self.shared.link).is_some()
    }

    /// Stops the receive thread, writes shoot-off and releases the port.
    /// Safe to call more than once.
    pub fn close(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
        if let Some(handle) = lock(&self.rx_thread).take() {
            if handle.join().is_err() {
                warn!("gimbal: receive thread panicked");
            }
        }

        if !self.is_open() {
            return;
        }
        if let Err(e) = self.update(|c| c.shoot = 0) {
            warn!("gimbal: shoot-off on close failed: {}", e);
        }
        if let Some(mut link) = lock(&self.shared.link).take() {
            link.close();
        }
        lock(&self.shared.status).connected = false;
        info!("gimbal: closed");
    }

    fn update(&self, f: impl FnOnce(&mut CommandFrame)) -> Result<(), GimbalError> {
        // Held across the send so frames leave in the order states were set.
        let mut cmd = lock(&self.shared.command);
        f(&mut cmd);
        self.send_frame(&cmd)
    }

    fn send_frame(&self, cmd: &CommandFrame) -> Result<(), GimbalError> {
        let frame = encode_command(self.cfg.can_id, cmd);
        let result = {
            let mut link = lock(&self.shared.link);
            let t = link.as_mut().ok_or(GimbalError::NotInitialized)?;
            t.send(&frame)
        };

        let mut st = lock(&self.shared.status);
        match result {
            Ok(()) => {
                st.frames_sent += 1;
                trace!("gimbal: tx {}", hex::encode(&frame));
                Ok(())
            }
            Err(e) => {
                st.send_failures += 1;
                if lock(&self.shared.send_warn).allow() {
                    warn!("gimbal: send failed ({} total): {}", st.send_failures, e);
                }
                Err(e.into())
            }
        }
    }
}

impl Drop for GimbalController {
    fn drop(&mut self) {
        self.close();
    }
}

fn receive_loop(shared: Arc<Shared>, poll: Duration, max_len: usize) {
    debug!("gimbal: receive loop started");
    let mut decoded: u64 = 0;

    while shared.running.load(Ordering::SeqCst) {
        let read = {
            let mut link = lock(&shared.link);
            match link.as_mut() {
                Some(t) => {
                    if t.available_bytes() >= STATUS_FRAME_MIN_LEN {
                        t.receive_up_to(max_len)
                    } else {
                        Ok(Vec::new())
                    }
                }
                None => Ok(Vec::new()),
            }
        };

        match read {
            Ok(bytes) if !bytes.is_empty() => match decode_status_07ff(&bytes) {
                Ok(st) => {
                    *lock(&shared.telemetry) = st;
                    lock(&shared.status).status_frames += 1;
                    decoded += 1;
                    if decoded % 20 == 1 {
                        debug!(
                            "gimbal: status pic={} yaw={} shoot={} idle={}",
                            st.pic, st.yaw, st.shoot, st.idle
                        );
                    }
                }
                Err(ProtoError::CanIdMismatch(_)) => match decode_status_7fe(&bytes) {
                    Ok(aux) => *lock(&shared.aux) = Some(aux),
                    Err(e) => trace!("gimbal: dropped {} bytes: {}", bytes.len(), e),
                },
                Err(e) => trace!("gimbal: dropped {} bytes: {}", bytes.len(), e),
            },
            Ok(_) => {}
            Err(e) => trace!("gimbal: rx error: {}", e),
        }

        thread::sleep(poll);
    }
    debug!("gimbal: receive loop stopped");
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::loopback::Loopback;
    use turret_proto::{encode_status_07ff, usbcan::DATA_FRAME_LEN};

    fn fast_cfg() -> GimbalConfig {
        GimbalConfig { settle_ms: 0, poll_interval_ms: 5, ..GimbalConfig::default() }
    }

    fn wait_until(mut f: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if f() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn initialize_sends_rate_config_then_shoot_off() {
        let lb = Loopback::new();
        let g = GimbalController::new(fast_cfg());
        g.initialize(&lb).unwrap();

        let sent = lb.sent();
        assert_eq!(&sent[0][..], &[0x55, 0x05, 0x00, 0xAA, 0x55]);
        assert_eq!(sent[1].len(), DATA_FRAME_LEN);
        let cmds = lb.sent_commands();
        assert_eq!(cmds[0].can_id, 0x601);
        assert_eq!(cmds[0].payload.shoot, 0);
        assert!(g.link_status().connected);
        g.close();
    }

    #[test]
    fn falls_back_through_candidates() {
        let lb = Loopback::with_ports(&["/dev/ttyUSB1"]);
        let g = GimbalController::new(fast_cfg());
        g.initialize(&lb).unwrap();
        let st = g.link_status();
        assert_eq!(st.port.as_deref(), Some("/dev/ttyUSB1"));
        assert_eq!(st.baud, Some(115_200));
    }

    #[test]
    fn no_port_is_an_error() {
        let lb = Loopback::with_ports(&[]);
        let g = GimbalController::new(fast_cfg());
        assert!(matches!(g.initialize(&lb), Err(GimbalError::NoPort { .. })));
        assert!(!g.is_open());
    }

    #[test]
    fn rate_config_failure_closes_port() {
        let lb = Loopback::new();
        lb.set_fail_sends(true);
        let g = GimbalController::new(fast_cfg());
        assert!(matches!(g.initialize(&lb), Err(GimbalError::RateConfig(_))));
        assert_eq!(lb.close_count(), 1);
        assert!(!g.is_open());
    }

    #[test]
    fn second_initialize_is_a_no_op() {
        let lb = Loopback::new();
        let g = GimbalController::new(fast_cfg());
        g.initialize(&lb).unwrap();
        g.initialize(&lb).unwrap();
        assert_eq!(lb.opened().len(), 1);
    }

    #[test]
    fn setters_clamp_and_send_full_frame() {
        let lb = Loopback::new();
        let g = GimbalController::new(fast_cfg());
        g.initialize(&lb).unwrap();

        g.set_yaw(-5).unwrap();
        assert_eq!(g.commanded().yaw, 0);
        g.set_yaw(40_000).unwrap();
        assert_eq!(g.commanded().yaw, 30_000);
        g.set_pitch(9_500).unwrap();
        g.trigger_shoot().unwrap();

        let last = lb.sent_commands().last().copied().unwrap();
        assert_eq!(last.payload, CommandFrame { pitch: 9_500, yaw: 30_000, shoot: 1, idle: 0 });
        assert_eq!(g.link_status().frames_sent, 5);
    }

    #[test]
    fn setters_before_initialize_update_state_but_fail() {
        let g = GimbalController::new(fast_cfg());
        assert!(matches!(g.set_yaw(40_000), Err(GimbalError::NotInitialized)));
        assert_eq!(g.commanded().yaw, 30_000);
        assert!(matches!(g.send_command(), Err(GimbalError::NotInitialized)));
    }

    #[test]
    fn failed_send_is_counted_not_retried() {
        let lb = Loopback::new();
        let g = GimbalController::new(fast_cfg());
        g.initialize(&lb).unwrap();
        let before = lb.sent().len();

        lb.set_fail_sends(true);
        assert!(g.set_pitch(1_000).is_err());
        assert_eq!(g.commanded().pitch, 1_000);
        assert_eq!(lb.sent().len(), before);
        assert_eq!(g.link_status().send_failures, 1);

        lb.set_fail_sends(false);
        g.send_command().unwrap();
        assert_eq!(lb.sent_commands().last().unwrap().payload.pitch, 1_000);
    }

    #[test]
    fn receive_loop_updates_snapshot() {
        let lb = Loopback::new();
        let g = GimbalController::new(fast_cfg());
        g.initialize(&lb).unwrap();
        assert_eq!(g.status_snapshot(), TelemetryStatus::default());

        let st = TelemetryStatus { pic: 12_000, yaw: 14_000, shoot: 1, idle: 3 };
        lb.push_inbound(&encode_status_07ff(&st));
        assert!(wait_until(|| g.status_snapshot() == st));
        assert_eq!(g.link_status().status_frames, 1);

        // garbage is dropped without touching the snapshot
        lb.push_inbound(&[0u8; 20]);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(g.status_snapshot(), st);
        g.close();
    }

    #[test]
    fn partial_status_frame_waits_for_the_rest() {
        let lb = Loopback::new();
        let g = GimbalController::new(fast_cfg());
        g.initialize(&lb).unwrap();

        let st = TelemetryStatus { pic: 10_500, yaw: 16_000, shoot: 0, idle: 9 };
        let frame = encode_status_07ff(&st);
        lb.push_inbound(&frame[..10]);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(g.status_snapshot(), TelemetryStatus::default());
        assert_eq!(g.link_status().status_frames, 0);

        lb.push_inbound(&frame[10..]);
        assert!(wait_until(|| g.status_snapshot() == st));
        g.close();
    }

    #[test]
    fn receive_loop_keeps_aux_status() {
        let lb = Loopback::new();
        let g = GimbalController::new(fast_cfg());
        g.initialize(&lb).unwrap();

        let mut frame = vec![0xAA, 0x00, 0x08, 0xFE, 0x07, 0x00, 0x00];
        frame.extend_from_slice(&[0x00, 0x10, 0x00, 0x20, 0x01, 0x02, 0x00, 0x00]);
        lb.push_inbound(&frame);
        assert!(wait_until(|| g.aux_snapshot().is_some()));
        assert_eq!(g.aux_snapshot().unwrap().d2, 0x20);
    }

    #[test]
    fn close_writes_shoot_off_and_is_idempotent() {
        let lb = Loopback::new();
        let g = GimbalController::new(fast_cfg());
        g.initialize(&lb).unwrap();
        g.trigger_shoot().unwrap();

        g.close();
        g.close();
        assert_eq!(lb.close_count(), 1);
        assert_eq!(lb.sent_commands().last().unwrap().payload.shoot, 0);
        assert!(!g.link_status().connected);
    }
}

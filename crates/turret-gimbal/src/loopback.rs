//! In-memory bridge used for `dry_run` and by tests.
//!
//! Every [`Transport`] it hands out shares one state block, so a test can keep
//! a clone of the [`Loopback`] and inspect what the controller wrote or feed
//! it status frames.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use turret_proto::{decode_command, encode_status_07ff, TelemetryStatus};

use crate::transport::{Connector, Transport, TransportError};

#[derive(Default)]
struct Bridge {
    allowed: Option<Vec<String>>,
    opened: Vec<(String, u32)>,
    sent: Vec<Bytes>,
    inbound: VecDeque<u8>,
    fail_sends: bool,
    echo_status: bool,
    closes: usize,
}

#[derive(Clone, Default)]
pub struct Loopback {
    inner: Arc<Mutex<Bridge>>,
}

fn lock(m: &Mutex<Bridge>) -> MutexGuard<'_, Bridge> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Loopback {
    /// Accepts any port name.
    pub fn new() -> Self {
        Self::default()
    }

    /// Only the listed ports open; everything else fails like a missing device.
    pub fn with_ports(ports: &[&str]) -> Self {
        let lb = Self::default();
        lock(&lb.inner).allowed = Some(ports.iter().map(|p| p.to_string()).collect());
        lb
    }

    /// Answer every command frame with a status frame that mirrors it, like a
    /// gimbal that reaches its set-point instantly.
    pub fn echo_status(self, on: bool) -> Self {
        lock(&self.inner).echo_status = on;
        self
    }

    pub fn push_inbound(&self, bytes: &[u8]) {
        lock(&self.inner).inbound.extend(bytes.iter().copied());
    }

    pub fn set_fail_sends(&self, fail: bool) {
        lock(&self.inner).fail_sends = fail;
    }

    pub fn sent(&self) -> Vec<Bytes> {
        lock(&self.inner).sent.clone()
    }

    /// Sent frames that parse as data frames, decoded.
    pub fn sent_commands(&self) -> Vec<turret_proto::DecodedCommand> {
        lock(&self.inner).sent.iter().filter_map(|f| decode_command(f).ok()).collect()
    }

    pub fn opened(&self) -> Vec<(String, u32)> {
        lock(&self.inner).opened.clone()
    }

    pub fn close_count(&self) -> usize {
        lock(&self.inner).closes
    }
}

impl Connector for Loopback {
    fn open(&self, port: &str, baud: u32) -> Result<Box<dyn Transport>, TransportError> {
        let mut b = lock(&self.inner);
        if let Some(allowed) = &b.allowed {
            if !allowed.iter().any(|p| p == port) {
                return Err(TransportError::Open {
                    port: port.to_string(),
                    baud,
                    reason: "no such device".into(),
                });
            }
        }
        b.opened.push((port.to_string(), baud));
        Ok(Box::new(LoopbackLink { inner: self.inner.clone(), open: true }))
    }
}

struct LoopbackLink {
    inner: Arc<Mutex<Bridge>>,
    open: bool,
}

impl Transport for LoopbackLink {
    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        if !self.open {
            return Err(TransportError::Closed);
        }
        let mut b = lock(&self.inner);
        if b.fail_sends {
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "loopback send failure",
            )));
        }
        b.sent.push(Bytes::copy_from_slice(bytes));

        if b.echo_status {
            if let Ok(cmd) = decode_command(bytes) {
                let p = cmd.payload;
                let status = TelemetryStatus { pic: p.pitch, yaw: p.yaw, shoot: p.shoot, idle: p.idle };
                b.inbound.clear();
                b.inbound.extend(encode_status_07ff(&status).iter().copied());
            }
        }
        Ok(())
    }

    fn receive_up_to(&mut self, max_len: usize) -> Result<Vec<u8>, TransportError> {
        if !self.open {
            return Err(TransportError::Closed);
        }
        let mut b = lock(&self.inner);
        let n = max_len.min(b.inbound.len());
        Ok(b.inbound.drain(..n).collect())
    }

    fn available_bytes(&mut self) -> usize {
        if !self.open {
            return 0;
        }
        lock(&self.inner).inbound.len()
    }

    fn flush(&mut self) -> Result<(), TransportError> {
        lock(&self.inner).inbound.clear();
        Ok(())
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            lock(&self.inner).closes += 1;
        }
    }
}

//! Byte-stream link to the USB-CAN bridge.
//!
//! The controller only ever sees [`Transport`]; opening goes through a
//! [`Connector`] so ports can be probed in turn and tests can hand in an
//! in-memory bridge.

use std::io::{self, Read, Write};
use std::time::Duration;

use thiserror::Error;
use tokio_serial::{ClearBuffer, DataBits, Parity, SerialPort, StopBits};
use tracing::debug;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("open {port} @ {baud}: {reason}")]
    Open { port: String, baud: u32, reason: String },
    #[error("serial io: {0}")]
    Io(#[from] io::Error),
    #[error("link closed")]
    Closed,
}

/// Not required to be internally synchronized; callers serialize access.
pub trait Transport: Send {
    /// Writes the whole buffer or fails.
    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Returns 0..=max_len bytes. May block up to the port timeout.
    fn receive_up_to(&mut self, max_len: usize) -> Result<Vec<u8>, TransportError>;

    fn available_bytes(&mut self) -> usize;

    /// Discards pending input.
    fn flush(&mut self) -> Result<(), TransportError>;

    fn close(&mut self);
}

pub trait Connector: Send + Sync {
    fn open(&self, port: &str, baud: u32) -> Result<Box<dyn Transport>, TransportError>;
}

pub struct SerialTransport {
    port: Option<Box<dyn SerialPort>>,
    name: String,
}

impl SerialTransport {
    fn port(&mut self) -> Result<&mut Box<dyn SerialPort>, TransportError> {
        self.port.as_mut().ok_or(TransportError::Closed)
    }
}

impl Transport for SerialTransport {
    fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let port = self.port()?;
        port.write_all(bytes)?;
        port.flush()?;
        Ok(())
    }

    fn receive_up_to(&mut self, max_len: usize) -> Result<Vec<u8>, TransportError> {
        let port = self.port()?;
        let mut buf = vec![0u8; max_len];
        match port.read(&mut buf) {
            Ok(n) => {
                buf.truncate(n);
                Ok(buf)
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn available_bytes(&mut self) -> usize {
        match self.port.as_ref() {
            Some(p) => p.bytes_to_read().map(|n| n as usize).unwrap_or(0),
            None => 0,
        }
    }

    fn flush(&mut self) -> Result<(), TransportError> {
        let port = self.port()?;
        port.clear(ClearBuffer::Input)
            .map_err(|e| TransportError::Io(io::Error::new(io::ErrorKind::Other, e)))
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            debug!("gimbal: closed {}", self.name);
        }
    }
}

/// Opens real serial ports, 8N1.
#[derive(Debug, Clone)]
pub struct SerialConnector {
    pub timeout: Duration,
}

impl SerialConnector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Connector for SerialConnector {
    fn open(&self, port: &str, baud: u32) -> Result<Box<dyn Transport>, TransportError> {
        let handle = tokio_serial::new(port, baud)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .timeout(self.timeout)
            .open()
            .map_err(|e| TransportError::Open {
                port: port.to_string(),
                baud,
                reason: e.to_string(),
            })?;

        Ok(Box::new(SerialTransport { port: Some(handle), name: port.to_string() }))
    }
}

use serde::Serialize;

/// Diagnostic view of the bridge link.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LinkStatus {
    pub connected: bool,
    pub port: Option<String>,
    pub baud: Option<u32>,
    pub frames_sent: u64,
    pub send_failures: u64,
    /// 0x07FF frames decoded by the receive loop.
    pub status_frames: u64,
}

impl LinkStatus {
    pub fn describe(&self) -> String {
        match (&self.port, self.baud) {
            (Some(p), Some(b)) if self.connected => format!("{} @ {}", p, b),
            _ => "disconnected".into(),
        }
    }
}

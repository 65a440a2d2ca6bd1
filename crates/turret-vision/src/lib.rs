//! What the control loop consumes from the vision side: frames and the
//! detections found in them. Capture and inference are behind traits; the
//! only feed shipped here replays a recorded detection log.

pub mod replay;

use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// One bounding box in pixel coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
    pub confidence: f32,
    pub class_id: i32,
    #[serde(default)]
    pub class_name: String,
}

impl Detection {
    pub fn center_x(&self) -> i32 {
        // the midpoint of two i32 always fits back into i32
        ((self.x1 as i64 + self.x2 as i64) / 2) as i32
    }
}

#[derive(Debug, Clone, Default)]
pub struct Frame {
    pub seq: u64,
    pub width: u32,
    pub height: u32,
    /// May be empty when the feed carries no image data.
    pub pixels: Vec<u8>,
}

pub trait FrameSource: Send {
    /// `None` means no frame this call; the caller just tries again.
    fn grab(&mut self, timeout: Duration) -> Option<Frame>;
}

pub trait Detector: Send {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>>;
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub kind: String, // "replay"
    pub path: String,
    /// Restart from the first record at end of file.
    pub loop_playback: bool,
    /// Pacing between frames; 0 = as fast as the consumer pulls.
    pub frame_interval_ms: u64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            kind: "replay".into(),
            path: "recordings/detections.jsonl".into(),
            loop_playback: true,
            frame_interval_ms: 33,
        }
    }
}

pub fn open_feed(cfg: &FeedConfig) -> Result<(Box<dyn FrameSource>, Box<dyn Detector>)> {
    match cfg.kind.as_str() {
        "replay" => {
            let (frames, det) = replay::open(cfg)?;
            let frames: Box<dyn FrameSource> = Box::new(frames);
            let det: Box<dyn Detector> = Box::new(det);
            Ok((frames, det))
        }
        other => anyhow::bail!("unknown feed.kind: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn center_is_midpoint() {
        let d = Detection {
            x1: 100,
            y1: 0,
            x2: 301,
            y2: 50,
            confidence: 0.9,
            class_id: 5,
            class_name: "red100".into(),
        };
        assert_eq!(d.center_x(), 200);
    }

    #[test]
    fn center_of_extreme_box_does_not_overflow() {
        let d = Detection {
            x1: i32::MAX - 10,
            y1: 0,
            x2: i32::MAX,
            y2: 1,
            confidence: 0.5,
            class_id: 6,
            class_name: String::new(),
        };
        assert_eq!(d.center_x(), i32::MAX - 5);
        let d = Detection { x1: i32::MIN, x2: i32::MIN + 2, ..d };
        assert_eq!(d.center_x(), i32::MIN + 1);
    }

    #[test]
    fn unknown_feed_kind_rejected() {
        let cfg = FeedConfig { kind: "camera".into(), ..FeedConfig::default() };
        assert!(open_feed(&cfg).is_err());
    }

    #[test]
    fn feed_defaults() {
        let cfg: FeedConfig = toml::from_str("path = \"x.jsonl\"").unwrap();
        assert_eq!(cfg.kind, "replay");
        assert!(cfg.loop_playback);
    }
}

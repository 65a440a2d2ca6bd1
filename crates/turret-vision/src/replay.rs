//! Replay of a recorded detection log.
//!
//! One JSON object per line: `{"width":640,"height":480,"detections":[...]}`.
//! Blank lines and lines starting with `#` are skipped. The frame source and
//! the detector share the records; the detector looks a frame up by its
//! sequence number.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, info};

use crate::{Detection, Detector, FeedConfig, Frame, FrameSource};

#[derive(Debug, Clone, Deserialize)]
pub struct Record {
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub detections: Vec<Detection>,
}

pub fn parse_records(text: &str) -> Result<Vec<Record>> {
    let mut out = Vec::new();
    for (i, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let rec: Record =
            serde_json::from_str(line).with_context(|| format!("replay line {}", i + 1))?;
        out.push(rec);
    }
    anyhow::ensure!(!out.is_empty(), "replay log has no records");
    Ok(out)
}

pub fn open(cfg: &FeedConfig) -> Result<(ReplayFrames, ReplayDetector)> {
    let text = std::fs::read_to_string(&cfg.path).with_context(|| format!("read replay log {}", cfg.path))?;
    let records = parse_records(&text)?;
    info!("vision: replaying {} frames from {}", records.len(), cfg.path);
    Ok(from_records(records, cfg.loop_playback, Duration::from_millis(cfg.frame_interval_ms)))
}

pub fn from_records(records: Vec<Record>, looping: bool, interval: Duration) -> (ReplayFrames, ReplayDetector) {
    let records = Arc::new(records);
    (
        ReplayFrames { records: records.clone(), next: 0, looping, interval },
        ReplayDetector { records },
    )
}

pub struct ReplayFrames {
    records: Arc<Vec<Record>>,
    next: u64,
    looping: bool,
    interval: Duration,
}

impl FrameSource for ReplayFrames {
    fn grab(&mut self, timeout: Duration) -> Option<Frame> {
        let len = self.records.len() as u64;
        if len == 0 || (!self.looping && self.next >= len) {
            // Exhausted: behave like a camera that stopped delivering.
            std::thread::sleep(timeout);
            return None;
        }
        if !self.interval.is_zero() {
            std::thread::sleep(self.interval);
        }

        let seq = self.next;
        self.next += 1;
        if seq > 0 && seq % len == 0 {
            debug!("vision: replay wrapped after {} frames", seq);
        }
        let rec = &self.records[(seq % len) as usize];
        Some(Frame { seq, width: rec.width, height: rec.height, pixels: Vec::new() })
    }
}

pub struct ReplayDetector {
    records: Arc<Vec<Record>>,
}

impl Detector for ReplayDetector {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        if self.records.is_empty() {
            return Ok(Vec::new());
        }
        let idx = (frame.seq % self.records.len() as u64) as usize;
        Ok(self.records[idx].detections.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOG: &str = r#"
# two frames
{"width":640,"height":480,"detections":[{"x1":300,"y1":10,"x2":340,"y2":60,"confidence":0.8,"class_id":6,"class_name":"red200"}]}

{"width":640,"height":480}
"#;

    #[test]
    fn parses_and_skips_comments() {
        let recs = parse_records(LOG).unwrap();
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].detections[0].class_name, "red200");
        assert!(recs[1].detections.is_empty());
    }

    #[test]
    fn bad_line_reports_its_number() {
        let err = parse_records("{\"width\":1,\"height\":1}\nnot json").unwrap_err();
        assert!(format!("{:#}", err).contains("replay line 2"));
        assert!(parse_records("\n# nothing\n").is_err());
    }

    #[test]
    fn frames_and_detections_stay_paired() {
        let (mut frames, mut det) = from_records(parse_records(LOG).unwrap(), true, Duration::ZERO);
        let seen: Vec<usize> = (0..5)
            .map(|_| {
                let f = frames.grab(Duration::ZERO).unwrap();
                det.detect(&f).unwrap().len()
            })
            .collect();
        assert_eq!(seen, vec![1, 0, 1, 0, 1]);
    }

    #[test]
    fn non_looping_replay_ends() {
        let (mut frames, _) = from_records(parse_records(LOG).unwrap(), false, Duration::ZERO);
        assert!(frames.grab(Duration::ZERO).is_some());
        assert!(frames.grab(Duration::ZERO).is_some());
        assert!(frames.grab(Duration::ZERO).is_none());
    }
}

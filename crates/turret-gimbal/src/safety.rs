use std::time::{Duration, Instant};

/// Lets an event through at most once per `min_interval`. Used to keep a
/// dead link from flooding the log at the control loop rate.
#[derive(Debug)]
pub struct RateLimit {
    last: Option<Instant>,
    min_interval: Duration,
}

impl RateLimit {
    pub fn new(min_interval: Duration) -> Self {
        Self { last: None, min_interval }
    }

    pub fn allow(&mut self) -> bool {
        self.allow_at(Instant::now())
    }

    pub fn allow_at(&mut self, now: Instant) -> bool {
        if let Some(t) = self.last {
            if now.saturating_duration_since(t) < self.min_interval {
                return false;
            }
        }
        self.last = Some(now);
        true
    }
}

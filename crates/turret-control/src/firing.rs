//! Duty-cycled trigger: on for `pulse_on_ms`, off for `pulse_off_ms`, for as
//! long as the target stays centered.

use std::time::{Duration, Instant};

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FiringConfig {
    /// Master switch. When false the trigger is held off at all times.
    pub enable: bool,
    pub pulse_on_ms: u64,
    pub pulse_off_ms: u64,
    /// Minimum lock age before the first shot.
    pub pre_fire_delay_ms: u64,
}

impl Default for FiringConfig {
    fn default() -> Self {
        Self { enable: true, pulse_on_ms: 400, pulse_off_ms: 200, pre_fire_delay_ms: 0 }
    }
}

impl FiringConfig {
    pub fn pulse_on(&self) -> Duration {
        Duration::from_millis(self.pulse_on_ms)
    }

    pub fn pulse_off(&self) -> Duration {
        Duration::from_millis(self.pulse_off_ms)
    }

    pub fn pre_fire_delay(&self) -> Duration {
        Duration::from_millis(self.pre_fire_delay_ms)
    }

    /// New trigger state if the current phase has run its course, `None` to
    /// keep it. No previous switch counts as long enough ago.
    pub fn next_toggle(&self, shooting: bool, last_switch: Option<Instant>, now: Instant) -> Option<bool> {
        let phase = if shooting { self.pulse_on() } else { self.pulse_off() };
        let due = match last_switch {
            None => true,
            Some(t) => now.saturating_duration_since(t) >= phase,
        };
        due.then_some(!shooting)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_shot_is_immediate() {
        let f = FiringConfig::default();
        assert_eq!(f.next_toggle(false, None, Instant::now()), Some(true));
    }

    #[test]
    fn phases_respect_durations() {
        let f = FiringConfig::default();
        let t0 = Instant::now();
        let ms = |n| t0 + Duration::from_millis(n);

        assert_eq!(f.next_toggle(true, Some(t0), ms(399)), None);
        assert_eq!(f.next_toggle(true, Some(t0), ms(400)), Some(false));
        assert_eq!(f.next_toggle(false, Some(t0), ms(199)), None);
        assert_eq!(f.next_toggle(false, Some(t0), ms(200)), Some(true));
    }
}

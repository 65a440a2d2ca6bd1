//! Patrol and targeting loops.
//!
//! Both loops share one [`SharedState`]; every decision that reads or moves
//! `current_yaw` is taken with its mutex held, and the resulting gimbal
//! commands are sent after it is released.

pub mod doctor;
pub mod elevation;
pub mod firing;
pub mod patrol;
pub mod runner;
pub mod sched;
pub mod state;
pub mod targeting;

use std::fmt;
use std::ops::Range;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use turret_gimbal::{GimbalController, GimbalError};

pub use elevation::ElevationTable;
pub use firing::FiringConfig;
pub use patrol::{Patrol, PatrolConfig};
pub use state::{SharedState, TargetLockState};
pub use targeting::{AimCommand, Targeter, TargetingConfig, TargetingPhase};

/// Which side's robots count as targets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Faction {
    #[default]
    Red,
    Blue,
}

impl Faction {
    /// Detector class ids belonging to this faction.
    pub fn class_range(self) -> Range<i32> {
        match self {
            Faction::Blue => 0..5,
            Faction::Red => 5..10,
        }
    }

    pub fn matches(self, class_id: i32) -> bool {
        self.class_range().contains(&class_id)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Faction::Red => "red",
            Faction::Blue => "blue",
        }
    }
}

impl fmt::Display for Faction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Faction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "red" => Ok(Faction::Red),
            "blue" => Ok(Faction::Blue),
            other => anyhow::bail!("unknown faction {:?} (expected red or blue)", other),
        }
    }
}

/// The slice of the gimbal the control loops drive.
pub trait GimbalDriver: Send + Sync {
    fn set_pitch(&self, angle: i32) -> Result<(), GimbalError>;
    fn set_yaw(&self, angle: i32) -> Result<(), GimbalError>;
    fn trigger_shoot(&self) -> Result<(), GimbalError>;
    fn stop_shoot(&self) -> Result<(), GimbalError>;
}

impl GimbalDriver for GimbalController {
    fn set_pitch(&self, angle: i32) -> Result<(), GimbalError> {
        GimbalController::set_pitch(self, angle)
    }

    fn set_yaw(&self, angle: i32) -> Result<(), GimbalError> {
        GimbalController::set_yaw(self, angle)
    }

    fn trigger_shoot(&self) -> Result<(), GimbalError> {
        GimbalController::trigger_shoot(self)
    }

    fn stop_shoot(&self) -> Result<(), GimbalError> {
        GimbalController::stop_shoot(self)
    }
}

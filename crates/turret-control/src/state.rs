use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

/// Lock/fire bookkeeping shared by the patrol and targeting loops.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetLockState {
    pub locked: bool,
    pub lock_started: Option<Instant>,
    /// Set on the first frame without a target while locked.
    pub lost_since: Option<Instant>,
    pub shooting: bool,
    pub last_pulse_switch: Option<Instant>,
    /// Last yaw either loop commanded.
    pub current_yaw: i32,
}

impl TargetLockState {
    pub fn new(initial_yaw: i32) -> Self {
        Self {
            locked: false,
            lock_started: None,
            lost_since: None,
            shooting: false,
            last_pulse_switch: None,
            current_yaw: initial_yaw,
        }
    }
}

pub struct SharedState {
    state: Mutex<TargetLockState>,
    running: AtomicBool,
}

impl SharedState {
    pub fn new(initial_yaw: i32) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(TargetLockState::new(initial_yaw)),
            running: AtomicBool::new(true),
        })
    }

    pub fn lock(&self) -> MutexGuard<'_, TargetLockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> TargetLockState {
        self.lock().clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

//! Best-effort scheduling hints for the targeting thread.

use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SchedConfig {
    /// Nice value for the calling thread (-20..19; negative needs privileges).
    pub nice: Option<i32>,
    /// Pin the calling thread to this CPU.
    pub cpu_core: Option<usize>,
}

/// Applies the hints to the current thread. Failures are logged and ignored.
pub fn apply_current_thread(cfg: &SchedConfig) {
    if cfg.nice.is_none() && cfg.cpu_core.is_none() {
        return;
    }
    apply(cfg);
}

#[cfg(target_os = "linux")]
fn apply(cfg: &SchedConfig) {
    use std::io;

    use tracing::{info, warn};

    if let Some(nice) = cfg.nice {
        // With PRIO_PROCESS a thread id targets just that thread on Linux.
        let rc = unsafe {
            let tid = libc::syscall(libc::SYS_gettid) as libc::id_t;
            libc::setpriority(libc::PRIO_PROCESS, tid, nice)
        };
        if rc == 0 {
            info!("sched: nice {}", nice);
        } else {
            warn!("sched: setpriority({}) failed: {}", nice, io::Error::last_os_error());
        }
    }

    if let Some(core) = cfg.cpu_core {
        if core >= libc::CPU_SETSIZE as usize {
            warn!("sched: cpu_core {} out of range", core);
            return;
        }
        let rc = unsafe {
            let mut set: libc::cpu_set_t = std::mem::zeroed();
            libc::CPU_SET(core, &mut set);
            libc::sched_setaffinity(0, std::mem::size_of::<libc::cpu_set_t>(), &set)
        };
        if rc == 0 {
            info!("sched: pinned to cpu {}", core);
        } else {
            warn!("sched: sched_setaffinity({}) failed: {}", core, io::Error::last_os_error());
        }
    }
}

#[cfg(not(target_os = "linux"))]
fn apply(cfg: &SchedConfig) {
    tracing::debug!("sched: hints {:?} not supported on this platform", cfg);
}

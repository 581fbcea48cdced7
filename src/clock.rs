use chrono::Local;
use std::time::Instant;

/// Timestamp used when no wall-clock time is available yet.
pub const NO_TIME: &str = "[no time]";

/// Earliest epoch second considered a synchronized clock (2020-01-01).
const EPOCH_VALID_FROM: i64 = 1577836800;

/// Clock collaborator: wall-clock time when synchronized, plus device uptime.
pub trait Clock: Send + Sync {
    /// Formatted local time, or `None` before time sync.
    fn now(&self) -> Option<String>;
    fn uptime_ms(&self) -> u64;
}

pub struct SystemClock {
    started: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Option<String> {
        let now = Local::now();
        if now.timestamp() < EPOCH_VALID_FROM {
            return None;
        }
        Some(now.format("%Y-%m-%d %H:%M:%S").to_string())
    }

    fn uptime_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}

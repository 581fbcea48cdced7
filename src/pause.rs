use log::debug;
use std::time::Duration;
use tokio::time::sleep;

/// Hard ceiling on an intentional pause, regardless of severity.
pub const MAX_PAUSE: Duration = Duration::from_millis(9000);

/// Granularity of the cooperative wait loop.
const SLICE: Duration = Duration::from_millis(50);

/// Watchdog-timer collaborator. `arm` requests a grace period in seconds;
/// `feed` must be called often enough during an intentional pause that the
/// hardware never mistakes it for a hang.
pub trait WatchdogTimer: Send + Sync {
    fn arm(&self, seconds: u32);
    fn feed(&self);
}

/// Host-side stand-in for the hardware watchdog.
pub struct NoopWatchdog;

impl WatchdogTimer for NoopWatchdog {
    fn arm(&self, seconds: u32) {
        debug!("Watchdog armed for {}s", seconds);
    }

    fn feed(&self) {}
}

/// Severity-to-pause mapping: 0 pauses not at all, 1..=9 pause for
/// `severity` seconds, anything above clamps to the 9 s ceiling.
pub fn pause_duration(severity: u8) -> Duration {
    if severity == 0 {
        return Duration::ZERO;
    }
    MAX_PAUSE.min(Duration::from_millis(u64::from(severity) * 1000))
}

/// Block cooperatively for `duration`, feeding the watchdog every slice.
///
/// The wait is intentionally slice-based rather than one long sleep: the
/// runtime keeps servicing I/O between slices and the watchdog keeps
/// getting fed, so an intentional pause cannot trip the reset the log
/// exists to diagnose. Exit is purely time-based; there is no early-out.
pub async fn hold(duration: Duration, watchdog: &dyn WatchdogTimer) {
    let deadline = tokio::time::Instant::now() + duration;
    loop {
        watchdog.feed();
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }
        sleep(remaining.min(SLICE)).await;
    }
}

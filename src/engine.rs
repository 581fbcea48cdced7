use crate::broadcast::BroadcastHub;
use crate::clock::{Clock, NO_TIME};
use crate::control::EngineFlags;
use crate::entry::{Frame, LogEntry, StatusSnapshot, WatchdogEntry};
use crate::pause::{self, WatchdogTimer};
use crate::reset::{ResetAttribution, ResetCause, ResetSource};
use crate::storage::Storage;
use crate::store::BoundedStore;
use log::{info, warn};
use std::panic::Location;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Call-site metadata for an emitted event.
#[derive(Debug, Clone)]
pub struct Origin {
    pub function: String,
    pub line: u32,
}

impl Origin {
    /// Captures the caller's line natively; the function name is passed in
    /// because Rust has no function-name equivalent of `line!`.
    #[track_caller]
    pub fn here(function: &str) -> Self {
        Self {
            function: function.to_string(),
            line: Location::caller().line(),
        }
    }
}

/// The diagnostic engine: bounded persistent log, one-shot reset
/// attribution, status snapshot, live broadcast, and the intentional
/// severity-scaled pause. One instance per process, one caller at a time.
pub struct DiagEngine {
    storage: Arc<dyn Storage>,
    log_store: BoundedStore<LogEntry>,
    watchdog_store: BoundedStore<WatchdogEntry>,
    status_blob: String,
    clock: Arc<dyn Clock>,
    reset_source: Arc<dyn ResetSource>,
    watchdog: Arc<dyn WatchdogTimer>,
    hub: BroadcastHub,
    flags: Arc<tokio::sync::Mutex<EngineFlags>>,
    attribution: Mutex<ResetAttribution>,
    warned_no_time: AtomicBool,
    extended_grace_armed: AtomicBool,
    extended_grace_secs: u32,
}

pub struct EngineParts {
    pub storage: Arc<dyn Storage>,
    pub clock: Arc<dyn Clock>,
    pub reset_source: Arc<dyn ResetSource>,
    pub watchdog: Arc<dyn WatchdogTimer>,
    pub hub: BroadcastHub,
    pub flags: Arc<tokio::sync::Mutex<EngineFlags>>,
    pub log_blob: String,
    pub watchdog_blob: String,
    pub status_blob: String,
    pub max_log_entries: usize,
    pub max_watchdog_entries: usize,
    pub extended_grace_secs: u32,
}

impl DiagEngine {
    pub fn new(parts: EngineParts) -> Self {
        let log_store = BoundedStore::new(
            Arc::clone(&parts.storage),
            parts.log_blob,
            "log",
            parts.max_log_entries,
        );
        let watchdog_store = BoundedStore::new(
            Arc::clone(&parts.storage),
            parts.watchdog_blob,
            "watchdogs",
            parts.max_watchdog_entries,
        );
        Self {
            storage: parts.storage,
            log_store,
            watchdog_store,
            status_blob: parts.status_blob,
            clock: parts.clock,
            reset_source: parts.reset_source,
            watchdog: parts.watchdog,
            hub: parts.hub,
            flags: parts.flags,
            attribution: Mutex::new(ResetAttribution::new()),
            warned_no_time: AtomicBool::new(false),
            extended_grace_armed: AtomicBool::new(false),
            extended_grace_secs: parts.extended_grace_secs,
        }
    }

    /// Boot-time reset correlation, run once before the first emit.
    ///
    /// Resolves the hardware reset cause, and after an abnormal restart
    /// retroactively copies the newest primary-store entry (the one written
    /// just before the crash) into the watchdog store annotated with the
    /// resolved cause. Guarded to run at most once per boot; calling it
    /// again is a no-op. Finishes by echoing that head entry to any
    /// already-attached observer.
    pub fn on_boot(&self) {
        let cause = self.reset_source.current_cause();
        let class = cause.classify();

        let proceed = {
            let mut attribution = self.attribution.lock().expect("attribution lock");
            attribution.resolve_once(cause);
            cause.is_abnormal() && attribution.begin_attribution()
        };

        if !class.text.is_empty() {
            info!("Reset cause: {} (code {})", class.text, cause.code());
        }

        if !proceed {
            return;
        }

        let Some(head) = self.log_store.load_all().into_iter().next() else {
            warn!("Abnormal reset ({}) but no prior log entry to attribute", class.text);
            return;
        };

        warn!(
            "Abnormal reset ({}), attributing last event before restart: {}",
            class.text, head.message
        );
        self.watchdog_store
            .append(WatchdogEntry::annotate(&head, cause.code(), &class));

        // The echo re-broadcasts the persisted head verbatim, including
        // whatever attribution it was stored with. This boot's one-shot
        // text stays un-consumed for the first log write.
        let head_cause = ResetCause::from_code(head.reset_reason);
        let echo = self.frame_for(
            &head,
            head.reset_reason,
            head_cause.is_watchdog(),
            &head.reset_reason_text,
        );
        self.hub.send(&echo);
    }

    /// Emit one diagnostic event.
    ///
    /// Severity 0 surfaces the event on the console only. Severity 1..=9
    /// additionally persists it, snapshots it as the last status, fans it
    /// out to observers, and then pauses for the severity-scaled duration
    /// (values above 9 clamp to the 9 s ceiling). Nothing here is fatal to
    /// the caller; on storage failure the engine degrades to console-only.
    pub async fn emit(&self, severity: u8, message: &str, var: Option<(&str, &str)>, origin: Origin) {
        let flags = *self.flags.lock().await;
        if !flags.logging_enabled {
            return;
        }

        let (var_name, var_value) = var.unwrap_or(("", ""));
        if severity == 0 || !flags.pause_on_emit {
            info!(
                "{}",
                plain_line(origin.line, &origin.function, message, var_name, var_value)
            );
        }

        if severity == 0 {
            return;
        }

        let cause = self.reset_source.current_cause();
        let reset_text = {
            let mut attribution = self.attribution.lock().expect("attribution lock");
            attribution.resolve_once(cause);
            attribution.take().unwrap_or_default()
        };

        let entry = LogEntry {
            timestamp: self.timestamp(),
            uptime_ms: self.clock.uptime_ms(),
            function: origin.function,
            line: origin.line,
            message: message.to_string(),
            var_name: var_name.to_string(),
            var_value: var_value.to_string(),
            reset_reason: cause.code(),
            reset_reason_text: reset_text,
        };

        if flags.pause_on_emit {
            info!("{}", stop_line(&entry));
        }

        self.log_store.append(entry.clone());

        // Coming up from a watchdog reset: mirror the event into the
        // watchdog store directly so the evidence survives log rotation.
        if cause.is_watchdog() {
            self.watchdog_store
                .append(WatchdogEntry::annotate(&entry, cause.code(), &cause.classify()));
        }

        self.write_status(&entry);

        // The entry above already consumed the one-shot attribution, so
        // this frame (and every later one this boot) reports it blank.
        self.hub.send(&self.frame_for(&entry, 0, false, ""));

        if flags.pause_on_emit {
            if !self.extended_grace_armed.swap(true, Ordering::Relaxed) {
                self.watchdog.arm(self.extended_grace_secs);
            }
            pause::hold(pause::pause_duration(severity), self.watchdog.as_ref()).await;
        }
    }

    /// Read-only views for the presentation layer.
    pub fn log_entries(&self) -> Vec<LogEntry> {
        self.log_store.load_all()
    }

    pub fn watchdog_entries(&self) -> Vec<WatchdogEntry> {
        self.watchdog_store.load_all()
    }

    /// Remove all three persisted blobs (the log-clear action).
    pub fn clear_all(&self) {
        self.log_store.clear();
        self.watchdog_store.clear();
        self.storage.remove(&self.status_blob);
        info!("Diagnostic logs cleared");
    }

    fn timestamp(&self) -> String {
        match self.clock.now() {
            Some(stamp) => stamp,
            None => {
                if !self.warned_no_time.swap(true, Ordering::Relaxed) {
                    warn!("No wall-clock time available, timestamping with sentinel");
                }
                NO_TIME.to_string()
            }
        }
    }

    fn write_status(&self, entry: &LogEntry) {
        let snapshot = StatusSnapshot::from_entry(entry);
        match serde_json::to_vec(&snapshot) {
            Ok(bytes) => {
                if let Err(e) = self.storage.write(&self.status_blob, &bytes) {
                    warn!("Failed to write status snapshot: {}", e);
                }
            }
            Err(e) => warn!("Failed to serialize status snapshot: {}", e),
        }
    }

    fn frame_for(&self, entry: &LogEntry, reset_reason: i32, watchdog: bool, reset_text: &str) -> Frame {
        let (fs_free_kb, fs_free_percent) = match self.storage.free_space() {
            Some((total, used)) if total > 0 => (
                (total.saturating_sub(used) / 1024) as i64,
                100.0 - (used as f64 * 100.0) / total as f64,
            ),
            _ => (-1, -1.0),
        };
        Frame {
            timestamp: entry.timestamp.clone(),
            uptime_ms: entry.uptime_ms,
            function: entry.function.clone(),
            line: entry.line,
            message: entry.message.clone(),
            var_name: entry.var_name.clone(),
            var_value: entry.var_value.clone(),
            reset_reason,
            watchdog,
            reset_reason_text: reset_text.to_string(),
            fs_free_kb,
            fs_free_percent,
        }
    }
}

/// Console line for events that bypass the stop path.
fn plain_line(line: u32, function: &str, message: &str, var_name: &str, var_value: &str) -> String {
    format!(
        "> {} | {}() | {} | {} = {}",
        line, function, message, var_name, var_value
    )
}

/// Richer console line printed when an event enters the stop path.
fn stop_line(entry: &LogEntry) -> String {
    format!(
        "> {} | {}() | {} | {} ms | {} | {} = {}",
        entry.line,
        entry.function,
        entry.timestamp,
        entry.uptime_ms,
        entry.message,
        entry.var_name,
        entry.var_value
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reset::ResetCause;
    use crate::storage::DirStorage;
    use std::sync::atomic::AtomicU32;
    use tempfile::TempDir;

    struct FixedClock;

    impl Clock for FixedClock {
        fn now(&self) -> Option<String> {
            None
        }
        fn uptime_ms(&self) -> u64 {
            1234
        }
    }

    struct FixedResetSource(ResetCause);

    impl ResetSource for FixedResetSource {
        fn current_cause(&self) -> ResetCause {
            self.0
        }
    }

    struct CountingWatchdog {
        arms: AtomicU32,
        feeds: AtomicU32,
    }

    impl CountingWatchdog {
        fn new() -> Self {
            Self {
                arms: AtomicU32::new(0),
                feeds: AtomicU32::new(0),
            }
        }
    }

    impl WatchdogTimer for CountingWatchdog {
        fn arm(&self, _seconds: u32) {
            self.arms.fetch_add(1, Ordering::Relaxed);
        }
        fn feed(&self) {
            self.feeds.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn engine(dir: &TempDir, cause: ResetCause) -> (DiagEngine, Arc<CountingWatchdog>) {
        let storage = Arc::new(DirStorage::new(dir.path().to_path_buf(), 1 << 20).unwrap());
        let watchdog = Arc::new(CountingWatchdog::new());
        let engine = DiagEngine::new(EngineParts {
            storage,
            clock: Arc::new(FixedClock),
            reset_source: Arc::new(FixedResetSource(cause)),
            watchdog: Arc::clone(&watchdog) as Arc<dyn WatchdogTimer>,
            hub: BroadcastHub::new(),
            flags: Arc::new(tokio::sync::Mutex::new(EngineFlags::default())),
            log_blob: "diag_log.json".to_string(),
            watchdog_blob: "diag_watchdog.json".to_string(),
            status_blob: "diag_status.json".to_string(),
            max_log_entries: 10,
            max_watchdog_entries: 10,
            extended_grace_secs: 300,
        });
        (engine, watchdog)
    }

    #[tokio::test(start_paused = true)]
    async fn severity_zero_is_console_only() {
        let dir = TempDir::new().unwrap();
        let (engine, _) = engine(&dir, ResetCause::PowerOn);
        engine.emit(0, "just looking", None, Origin::here("test")).await;
        assert!(engine.log_entries().is_empty());
        assert!(!dir.path().join("diag_status.json").exists());
    }

    #[tokio::test(start_paused = true)]
    async fn severity_one_persists_and_snapshots() {
        let dir = TempDir::new().unwrap();
        let (engine, _) = engine(&dir, ResetCause::PowerOn);
        engine
            .emit(1, "something happened", Some(("count", "42")), Origin::here("test"))
            .await;

        let entries = engine.log_entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message, "something happened");
        assert_eq!(entries[0].var_name, "count");
        assert_eq!(entries[0].timestamp, NO_TIME);
        assert_eq!(entries[0].reset_reason, ResetCause::PowerOn.code());
        assert!(dir.path().join("diag_status.json").exists());
    }

    #[tokio::test(start_paused = true)]
    async fn reset_text_is_attached_to_exactly_one_entry_per_boot() {
        let dir = TempDir::new().unwrap();
        let (engine, _) = engine(&dir, ResetCause::Panic);
        engine.on_boot();
        engine.emit(1, "first", None, Origin::here("test")).await;
        engine.emit(1, "second", None, Origin::here("test")).await;

        let entries = engine.log_entries();
        assert_eq!(entries[0].message, "second");
        assert_eq!(entries[0].reset_reason_text, "");
        assert_eq!(entries[1].message, "first");
        assert_eq!(entries[1].reset_reason_text, "Panic");
    }

    #[tokio::test(start_paused = true)]
    async fn retroactive_attribution_copies_the_pre_crash_head_once() {
        let dir = TempDir::new().unwrap();

        // Previous boot: one event persisted, then the task watchdog bit.
        {
            let (engine, _) = engine(&dir, ResetCause::PowerOn);
            engine.emit(2, "X", None, Origin::here("test")).await;
        }

        let (engine, _) = engine(&dir, ResetCause::TaskWatchdog);
        engine.on_boot();
        engine.on_boot();

        let watchdogs = engine.watchdog_entries();
        assert_eq!(watchdogs.len(), 1);
        assert_eq!(watchdogs[0].message, "X");
        assert!(watchdogs[0].critical);
        assert_eq!(watchdogs[0].reset_text, "Task-WDT");
        assert_eq!(watchdogs[0].reset_color, "red");
    }

    #[tokio::test(start_paused = true)]
    async fn boot_echo_does_not_consume_this_boots_attribution() {
        let dir = TempDir::new().unwrap();

        // Previous boot stores one entry carrying that boot's own text.
        {
            let (engine, _) = engine(&dir, ResetCause::PowerOn);
            engine.emit(1, "before the crash", None, Origin::here("test")).await;
        }

        let (engine, _) = engine(&dir, ResetCause::TaskWatchdog);
        let mut observer = engine.hub.attach();
        engine.on_boot();

        // The echo frame replays the persisted head verbatim, with the
        // attribution it was stored with, not this boot's.
        let echo: Frame = serde_json::from_str(&observer.recv().await.unwrap()).unwrap();
        assert_eq!(echo.message, "before the crash");
        assert_eq!(echo.reset_reason_text, "PowerOn");
        assert_eq!(echo.reset_reason, ResetCause::PowerOn.code());
        assert!(!echo.watchdog);

        // This boot's text lands on exactly one record: the first log
        // write. Its broadcast frame is already blank.
        engine.emit(1, "first after boot", None, Origin::here("test")).await;
        let frame: Frame = serde_json::from_str(&observer.recv().await.unwrap()).unwrap();
        assert_eq!(frame.message, "first after boot");
        assert_eq!(frame.reset_reason_text, "");

        let entries = engine.log_entries();
        assert_eq!(entries[0].reset_reason_text, "Task-WDT");
        assert_eq!(entries[1].reset_reason_text, "PowerOn");
    }

    #[tokio::test(start_paused = true)]
    async fn normal_boot_does_not_attribute() {
        let dir = TempDir::new().unwrap();
        {
            let (engine, _) = engine(&dir, ResetCause::PowerOn);
            engine.emit(1, "quiet life", None, Origin::here("test")).await;
        }
        let (engine, _) = engine(&dir, ResetCause::PowerOn);
        engine.on_boot();
        assert!(engine.watchdog_entries().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn abnormal_boot_with_empty_log_attributes_nothing() {
        let dir = TempDir::new().unwrap();
        let (engine, _) = engine(&dir, ResetCause::Brownout);
        engine.on_boot();
        assert!(engine.watchdog_entries().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn watchdog_region_boot_mirrors_emits_directly() {
        let dir = TempDir::new().unwrap();
        let (engine, _) = engine(&dir, ResetCause::Watchdog);
        engine.emit(1, "after the bite", None, Origin::here("test")).await;

        let watchdogs = engine.watchdog_entries();
        assert_eq!(watchdogs.len(), 1);
        assert_eq!(watchdogs[0].message, "after the bite");
        assert_eq!(watchdogs[0].reset_text, "WDT");
    }

    #[tokio::test(start_paused = true)]
    async fn emit_pauses_for_the_scaled_duration_and_feeds() {
        let dir = TempDir::new().unwrap();
        let (engine, watchdog) = engine(&dir, ResetCause::PowerOn);
        let before = tokio::time::Instant::now();
        engine.emit(5, "hold it", None, Origin::here("test")).await;
        assert_eq!(before.elapsed(), std::time::Duration::from_millis(5000));
        assert_eq!(watchdog.arms.load(Ordering::Relaxed), 1);
        assert!(watchdog.feeds.load(Ordering::Relaxed) > 0);

        // Extended grace is armed only once across emits.
        engine.emit(1, "again", None, Origin::here("test")).await;
        assert_eq!(watchdog.arms.load(Ordering::Relaxed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn logging_disabled_suppresses_everything() {
        let dir = TempDir::new().unwrap();
        let (engine, _) = engine(&dir, ResetCause::PowerOn);
        engine.flags.lock().await.apply(crate::control::Command::LogOff);
        let before = tokio::time::Instant::now();
        engine.emit(9, "nobody home", None, Origin::here("test")).await;
        assert!(engine.log_entries().is_empty());
        assert_eq!(before.elapsed(), std::time::Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_disabled_still_persists() {
        let dir = TempDir::new().unwrap();
        let (engine, _) = engine(&dir, ResetCause::PowerOn);
        engine.flags.lock().await.pause_on_emit = false;
        let before = tokio::time::Instant::now();
        engine.emit(9, "no nap", None, Origin::here("test")).await;
        assert_eq!(engine.log_entries().len(), 1);
        assert_eq!(before.elapsed(), std::time::Duration::ZERO);
    }

    struct OverfullStorage {
        blobs: Mutex<std::collections::HashMap<String, Vec<u8>>>,
    }

    impl crate::storage::Storage for OverfullStorage {
        fn exists(&self, name: &str) -> bool {
            self.blobs.lock().unwrap().contains_key(name)
        }
        fn read(&self, name: &str) -> Result<Option<Vec<u8>>, crate::error::DiagError> {
            Ok(self.blobs.lock().unwrap().get(name).cloned())
        }
        fn write(&self, name: &str, bytes: &[u8]) -> Result<(), crate::error::DiagError> {
            self.blobs
                .lock()
                .unwrap()
                .insert(name.to_string(), bytes.to_vec());
            Ok(())
        }
        fn remove(&self, name: &str) {
            self.blobs.lock().unwrap().remove(name);
        }
        fn free_space(&self) -> Option<crate::storage::SpaceStats> {
            // Usage past the quota, as an overcommitted flash would report.
            Some((10, 20))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn usage_past_quota_does_not_panic_the_frame() {
        let storage = Arc::new(OverfullStorage {
            blobs: Mutex::new(std::collections::HashMap::new()),
        });
        let engine = DiagEngine::new(EngineParts {
            storage,
            clock: Arc::new(FixedClock),
            reset_source: Arc::new(FixedResetSource(ResetCause::PowerOn)),
            watchdog: Arc::new(CountingWatchdog::new()),
            hub: BroadcastHub::new(),
            flags: Arc::new(tokio::sync::Mutex::new(EngineFlags::default())),
            log_blob: "diag_log.json".to_string(),
            watchdog_blob: "diag_watchdog.json".to_string(),
            status_blob: "diag_status.json".to_string(),
            max_log_entries: 10,
            max_watchdog_entries: 10,
            extended_grace_secs: 300,
        });
        let mut observer = engine.hub.attach();
        engine.emit(1, "tight fit", None, Origin::here("test")).await;

        let frame: Frame = serde_json::from_str(&observer.recv().await.unwrap()).unwrap();
        assert_eq!(frame.fs_free_kb, 0);
        assert_eq!(engine.log_entries().len(), 1);
    }

    #[test]
    fn stop_line_carries_timestamp_and_uptime() {
        let entry = LogEntry {
            timestamp: "2026-01-02 03:04:05".to_string(),
            uptime_ms: 777,
            function: "loop_body".to_string(),
            line: 42,
            message: "stuck".to_string(),
            var_name: "i".to_string(),
            var_value: "3".to_string(),
            reset_reason: 0,
            reset_reason_text: String::new(),
        };
        let line = stop_line(&entry);
        assert!(line.contains("2026-01-02 03:04:05"));
        assert!(line.contains("777 ms"));
        assert!(line.contains("loop_body()"));

        let plain = plain_line(42, "loop_body", "stuck", "i", "3");
        assert!(!plain.contains("777"));
        assert!(plain.contains("i = 3"));
    }

    #[tokio::test(start_paused = true)]
    async fn clear_all_removes_every_blob() {
        let dir = TempDir::new().unwrap();
        let (engine, _) = engine(&dir, ResetCause::Watchdog);
        engine.emit(1, "evidence", None, Origin::here("test")).await;
        engine.clear_all();
        assert!(engine.log_entries().is_empty());
        assert!(engine.watchdog_entries().is_empty());
        assert!(!dir.path().join("diag_status.json").exists());
    }
}

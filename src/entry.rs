use crate::reset::ResetClass;
use serde::{Deserialize, Serialize};

/// A single diagnostic event, newest-first in the persisted log document.
///
/// Field names are the persisted on-disk format and must stay stable.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogEntry {
    /// Local wall-clock time, or the "[no time]" sentinel.
    pub timestamp: String,
    pub uptime_ms: u64,
    pub function: String,
    pub line: u32,
    pub message: String,
    #[serde(default)]
    pub var_name: String,
    #[serde(default)]
    pub var_value: String,
    /// Hardware reset cause code at write time.
    #[serde(default)]
    pub reset_reason: i32,
    /// One-shot human-readable reset cause; empty once consumed this boot.
    #[serde(default)]
    pub reset_reason_text: String,
}

/// A log entry copied into the watchdog store, annotated with the resolved
/// reset classification so abnormal-restart evidence is never evicted by
/// ordinary traffic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WatchdogEntry {
    pub timestamp: String,
    pub uptime_ms: u64,
    pub function: String,
    pub line: u32,
    pub message: String,
    #[serde(default)]
    pub var_name: String,
    #[serde(default)]
    pub var_value: String,
    pub reset_reason: i32,
    pub reset_text: String,
    pub reset_color: String,
    pub critical: bool,
}

impl WatchdogEntry {
    /// Copy a log entry into the watchdog store, annotated with the
    /// resolved reset classification.
    pub fn annotate(entry: &LogEntry, reset_reason: i32, class: &ResetClass) -> Self {
        Self {
            timestamp: entry.timestamp.clone(),
            uptime_ms: entry.uptime_ms,
            function: entry.function.clone(),
            line: entry.line,
            message: entry.message.clone(),
            var_name: entry.var_name.clone(),
            var_value: entry.var_value.clone(),
            reset_reason,
            reset_text: class.text.to_string(),
            reset_color: class.color.to_string(),
            critical: class.critical,
        }
    }
}

/// Single-entry snapshot of the most recent persisted event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub timestamp: String,
    pub uptime_ms: u64,
    pub function: String,
    pub line: u32,
    pub message: String,
    pub var_name: String,
    pub var_value: String,
}

/// One broadcast frame, serialized as a single NDJSON line to observers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Frame {
    pub timestamp: String,
    pub uptime_ms: u64,
    pub function: String,
    pub line: u32,
    pub message: String,
    pub var_name: String,
    pub var_value: String,
    /// 0 once the attribution has been consumed this boot.
    pub reset_reason: i32,
    pub watchdog: bool,
    pub reset_reason_text: String,
    /// -1 when storage is unavailable.
    pub fs_free_kb: i64,
    pub fs_free_percent: f64,
}

impl StatusSnapshot {
    pub fn from_entry(entry: &LogEntry) -> Self {
        Self {
            timestamp: entry.timestamp.clone(),
            uptime_ms: entry.uptime_ms,
            function: entry.function.clone(),
            line: entry.line,
            message: entry.message.clone(),
            var_name: entry.var_name.clone(),
            var_value: entry.var_value.clone(),
        }
    }
}

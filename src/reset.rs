use std::path::PathBuf;

/// Hardware reset causes, with the ESP-IDF integer codes they are
/// persisted and broadcast as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ResetCause {
    Unknown = 0,
    PowerOn = 1,
    External = 2,
    Software = 3,
    Panic = 4,
    IntWatchdog = 5,
    TaskWatchdog = 6,
    Watchdog = 7,
    DeepSleep = 8,
    Brownout = 9,
    Sdio = 10,
}

impl ResetCause {
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => ResetCause::PowerOn,
            2 => ResetCause::External,
            3 => ResetCause::Software,
            4 => ResetCause::Panic,
            5 => ResetCause::IntWatchdog,
            6 => ResetCause::TaskWatchdog,
            7 => ResetCause::Watchdog,
            8 => ResetCause::DeepSleep,
            9 => ResetCause::Brownout,
            10 => ResetCause::Sdio,
            _ => ResetCause::Unknown,
        }
    }

    pub fn code(self) -> i32 {
        self as i32
    }

    /// Any restart that was not a normal power-on or intentional reset:
    /// panic, any watchdog expiry, or brownout.
    pub fn is_abnormal(self) -> bool {
        self.classify().critical
    }

    /// The watchdog reset region proper.
    pub fn is_watchdog(self) -> bool {
        matches!(
            self,
            ResetCause::Watchdog | ResetCause::TaskWatchdog | ResetCause::IntWatchdog
        )
    }

    /// Total classification of the cause into human text, a severity color
    /// for the presentation layer, and the critical flag.
    pub fn classify(self) -> ResetClass {
        match self {
            ResetCause::Panic => ResetClass::critical("Panic"),
            ResetCause::IntWatchdog => ResetClass::critical("Int-WDT"),
            ResetCause::TaskWatchdog => ResetClass::critical("Task-WDT"),
            ResetCause::Watchdog => ResetClass::critical("WDT"),
            ResetCause::Brownout => ResetClass::critical("Brownout"),
            ResetCause::External => ResetClass::normal("ExtReset", "orange"),
            ResetCause::Software => ResetClass::normal("SW-Reset", "orange"),
            ResetCause::Sdio => ResetClass::normal("SDIO", "orange"),
            ResetCause::PowerOn => ResetClass::normal("PowerOn", "green"),
            ResetCause::DeepSleep => ResetClass::normal("DeepSleep", "green"),
            ResetCause::Unknown => ResetClass::normal("", "gray"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResetClass {
    pub text: &'static str,
    pub color: &'static str,
    pub critical: bool,
}

impl ResetClass {
    fn critical(text: &'static str) -> Self {
        Self {
            text,
            color: "red",
            critical: true,
        }
    }

    fn normal(text: &'static str, color: &'static str) -> Self {
        Self {
            text,
            color,
            critical: false,
        }
    }
}

/// Per-boot one-shot attribution state.
///
/// The resolved reset text is attached to exactly one emitted record per
/// boot, then blanked, so later unrelated events are never tagged with a
/// stale crash explanation. The retroactive watchdog-store copy is guarded
/// separately and runs at most once per boot.
#[derive(Debug, Default)]
pub struct ResetAttribution {
    resolved: Option<String>,
    exported: bool,
    attributed: bool,
}

impl ResetAttribution {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compute and memoize the reset text the first time; later calls see
    /// the cached value until it is taken.
    pub fn resolve_once(&mut self, cause: ResetCause) -> &str {
        if self.resolved.is_none() && !self.exported {
            self.resolved = Some(cause.classify().text.to_string());
        }
        self.resolved.as_deref().unwrap_or("")
    }

    /// One-shot read: the resolved text if it has not been exported yet.
    pub fn take(&mut self) -> Option<String> {
        let text = self.resolved.take().filter(|t| !t.is_empty())?;
        self.exported = true;
        Some(text)
    }

    /// True exactly once; guards the retroactive watchdog copy.
    pub fn begin_attribution(&mut self) -> bool {
        if self.attributed {
            return false;
        }
        self.attributed = true;
        true
    }
}

/// Hardware-reset collaborator.
pub trait ResetSource: Send + Sync {
    fn current_cause(&self) -> ResetCause;
}

/// Reads the reset cause code from a file, the way a bootloader or init
/// script would leave it behind. Absent file means a normal power-on.
pub struct FileResetSource {
    path: Option<PathBuf>,
}

impl FileResetSource {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }
}

impl ResetSource for FileResetSource {
    fn current_cause(&self) -> ResetCause {
        let Some(path) = &self.path else {
            return ResetCause::PowerOn;
        };
        match std::fs::read_to_string(path) {
            Ok(contents) => contents
                .trim()
                .parse::<i32>()
                .map(ResetCause::from_code)
                .unwrap_or(ResetCause::Unknown),
            Err(_) => ResetCause::PowerOn,
        }
    }
}

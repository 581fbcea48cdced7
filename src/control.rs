use log::info;

/// Inbound observer commands. Anything unrecognized is ignored silently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Restore emission and pausing.
    LogOn,
    /// Suppress all further emission and pausing.
    LogOff,
}

impl Command {
    pub fn parse(line: &str) -> Option<Self> {
        match line.trim() {
            "LOG_ON" => Some(Command::LogOn),
            "LOG_OFF" => Some(Command::LogOff),
            _ => None,
        }
    }
}

/// Process-wide emission switches, owned by the engine and toggled by the
/// remote control channel. Both start enabled.
#[derive(Debug, Clone, Copy)]
pub struct EngineFlags {
    pub logging_enabled: bool,
    pub pause_on_emit: bool,
}

impl Default for EngineFlags {
    fn default() -> Self {
        Self {
            logging_enabled: true,
            pause_on_emit: true,
        }
    }
}

impl EngineFlags {
    pub fn apply(&mut self, command: Command) {
        match command {
            Command::LogOn => {
                self.logging_enabled = true;
                self.pause_on_emit = true;
                info!("Remote command: logging enabled");
            }
            Command::LogOff => {
                self.logging_enabled = false;
                self.pause_on_emit = false;
                info!("Remote command: logging disabled");
            }
        }
    }
}

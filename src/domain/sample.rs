// Telemetry sample domain model
use chrono::{DateTime, Local};

/// Relay state as reported by the device in a sensor frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    On,
    Off,
    /// The relay token was neither "ON" nor "OFF".
    Unknown,
}

impl RelayState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RelayState::On => "ON",
            RelayState::Off => "OFF",
            RelayState::Unknown => "UNKNOWN",
        }
    }
}

/// Outbound relay command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayCommand {
    On,
    Off,
}

/// One decoded telemetry reading. Immutable after construction; every
/// downstream consumer (history, log, presentation) receives its own clone.
#[derive(Debug, Clone)]
pub struct Sample {
    /// Seconds since the monitoring session started.
    pub session_elapsed: f64,
    pub voltage: f64,
    pub current: f64,
    pub power: f64,
    pub temperature: f64,
    pub relay: RelayState,
    /// Device-reported status string, e.g. "NORMAL". Opaque except for the
    /// literal "NORMAL" comparison used for alerting.
    pub safety: String,
    /// Wall-clock time the frame was accepted, used for log rows.
    pub arrival_time: DateTime<Local>,
}

impl Sample {
    pub fn is_safety_normal(&self) -> bool {
        self.safety == "NORMAL"
    }
}

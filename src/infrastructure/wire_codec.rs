// Wire codec for the device's comma-delimited sensor frames
//
// Frame layout, positions 0-based; label tokens are cosmetic and ignored:
//
//   V,230.5,A,1.20,P,276.6,T,35.2,R,ON,S,NORMAL
//   0 1     2 3    4 5     6 7    8 9  10 11
//
// The codec is stateless: arrival metadata is stamped by the caller, so
// decoding stays testable independent of the wall clock.

use chrono::{DateTime, Local};

use crate::domain::sample::{RelayCommand, RelayState, Sample};
use crate::error::{MonitorError, MonitorResult};

const MIN_FIELDS: usize = 12;
const IDX_VOLTAGE: usize = 1;
const IDX_CURRENT: usize = 3;
const IDX_POWER: usize = 5;
const IDX_TEMPERATURE: usize = 7;
const IDX_RELAY: usize = 9;
const IDX_SAFETY: usize = 11;

/// Field values recovered from one frame, before arrival metadata exists.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFrame {
    pub voltage: f64,
    pub current: f64,
    pub power: f64,
    pub temperature: f64,
    pub relay: RelayState,
    pub safety: String,
}

impl DecodedFrame {
    /// Stamp arrival metadata, producing the immutable sample.
    pub fn into_sample(self, session_elapsed: f64, arrival_time: DateTime<Local>) -> Sample {
        Sample {
            session_elapsed,
            voltage: self.voltage,
            current: self.current,
            power: self.power,
            temperature: self.temperature,
            relay: self.relay,
            safety: self.safety,
            arrival_time,
        }
    }
}

/// Decode one raw payload. Any structural or numeric defect is a
/// `MalformedFrame`; an unrecognised relay token is not (it maps to
/// `RelayState::Unknown`).
pub fn decode(payload: &[u8]) -> MonitorResult<DecodedFrame> {
    let text = std::str::from_utf8(payload)
        .map_err(|_| MonitorError::MalformedFrame("payload is not valid UTF-8".into()))?;
    let fields: Vec<&str> = text.trim().split(',').collect();
    if fields.len() < MIN_FIELDS {
        return Err(MonitorError::MalformedFrame(format!(
            "expected at least {MIN_FIELDS} fields, got {}",
            fields.len()
        )));
    }

    let relay = match fields[IDX_RELAY] {
        "ON" => RelayState::On,
        "OFF" => RelayState::Off,
        _ => RelayState::Unknown,
    };

    Ok(DecodedFrame {
        voltage: parse_number(fields[IDX_VOLTAGE], "voltage")?,
        current: parse_number(fields[IDX_CURRENT], "current")?,
        power: parse_number(fields[IDX_POWER], "power")?,
        temperature: parse_number(fields[IDX_TEMPERATURE], "temperature")?,
        relay,
        safety: fields[IDX_SAFETY].to_string(),
    })
}

/// Produce the literal command token the device firmware expects.
pub fn encode_command(command: RelayCommand) -> &'static str {
    match command {
        RelayCommand::On => "ON",
        RelayCommand::Off => "OFF",
    }
}

fn parse_number(token: &str, name: &str) -> MonitorResult<f64> {
    let value: f64 = token
        .trim()
        .parse()
        .map_err(|_| MonitorError::MalformedFrame(format!("{name} token {token:?} is not a number")))?;
    if !value.is_finite() {
        return Err(MonitorError::MalformedFrame(format!(
            "{name} token {token:?} is not finite"
        )));
    }
    Ok(value)
}

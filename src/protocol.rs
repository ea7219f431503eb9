//! Message shapes exchanged with the CAN bridge.
//!
//! Inbound frames are per-joint telemetry snapshots with terse keys
//! (`{"type":"state","j":2,"a":10,...}`); outbound frames are single commands tagged
//! by `type`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MICROSTEP_TABLE: [u32; 9] = [1, 2, 4, 8, 16, 32, 64, 128, 256];
pub const DEFAULT_MICROSTEP: u32 = 32;
const STATE_FRAME_KIND: &str = "state";

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame is not a JSON object")]
    NotAnObject,
    #[error("field `{0}` is not a finite number")]
    NonFinite(&'static str),
}

/// Driver status bits, `f` on the wire.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JointFlags {
    pub ok: bool,
    pub open_load: bool,
    pub over_temp_warning: bool,
    pub over_temp: bool,
    pub stall: bool,
    pub homing: bool,
    pub closed_loop: bool,
    pub calibrating: bool,
}

impl JointFlags {
    pub fn from_bits(bits: u8) -> Self {
        Self {
            ok: bits & 0x01 != 0,
            open_load: bits & 0x02 != 0,
            over_temp_warning: bits & 0x04 != 0,
            over_temp: bits & 0x08 != 0,
            stall: bits & 0x10 != 0,
            homing: bits & 0x20 != 0,
            closed_loop: bits & 0x40 != 0,
            calibrating: bits & 0x80 != 0,
        }
    }

    pub fn bits(&self) -> u8 {
        [
            self.ok,
            self.open_load,
            self.over_temp_warning,
            self.over_temp,
            self.stall,
            self.homing,
            self.closed_loop,
            self.calibrating,
        ]
        .iter()
        .enumerate()
        .fold(0u8, |acc, (bit, set)| if *set { acc | (1 << bit) } else { acc })
    }
}

/// Microstep setting reported as `u`.
///
/// Bridges report either the microstep value itself or its index in
/// [`MICROSTEP_TABLE`]; a raw value is recognised first. Anything else reads as
/// [`DEFAULT_MICROSTEP`].
pub fn decode_microstep(raw: u32) -> u32 {
    if MICROSTEP_TABLE.contains(&raw) {
        return raw;
    }
    usize::try_from(raw)
        .ok()
        .and_then(|index| MICROSTEP_TABLE.get(index).copied())
        .unwrap_or(DEFAULT_MICROSTEP)
}

pub fn is_valid_microstep(value: u32) -> bool {
    MICROSTEP_TABLE.contains(&value)
}

/// One joint's telemetry. Only `j` and `a` are mandatory; absent fields leave the
/// previous value in place.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct TelemetrySnapshot {
    #[serde(rename = "j")]
    pub joint: usize,
    #[serde(rename = "a")]
    pub angle: f32,
    #[serde(rename = "t", default)]
    pub target: Option<f32>,
    #[serde(rename = "s", default)]
    pub speed: Option<f32>,
    #[serde(rename = "u", default)]
    pub microstep: Option<u32>,
    #[serde(rename = "i", default)]
    pub current_ma: Option<f32>,
    #[serde(rename = "acc", default)]
    pub accel: Option<f32>,
    #[serde(rename = "f", default)]
    pub flags: Option<u8>,
}

impl TelemetrySnapshot {
    pub fn decoded_flags(&self) -> Option<JointFlags> {
        self.flags.map(JointFlags::from_bits)
    }

    pub fn decoded_microstep(&self) -> Option<u32> {
        self.microstep.map(decode_microstep)
    }

    fn validate(self) -> Result<Self, TelemetryError> {
        let checks = [
            ("a", Some(self.angle)),
            ("t", self.target),
            ("s", self.speed),
            ("i", self.current_ma),
            ("acc", self.accel),
        ];
        for (name, value) in checks {
            if value.is_some_and(|v| !v.is_finite()) {
                return Err(TelemetryError::NonFinite(name));
            }
        }
        Ok(self)
    }
}

/// Decode one inbound text frame.
///
/// Returns `Ok(None)` for well-formed frames of another `type`; a frame without a
/// `type` is read as joint state.
pub fn parse_frame(text: &str) -> Result<Option<TelemetrySnapshot>, TelemetryError> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    let object = value.as_object().ok_or(TelemetryError::NotAnObject)?;
    match object.get("type").and_then(|kind| kind.as_str()) {
        Some(kind) if kind != STATE_FRAME_KIND => return Ok(None),
        _ => {}
    }
    let snapshot: TelemetrySnapshot = serde_json::from_value(value)?;
    snapshot.validate().map(Some)
}

/// One discrete outbound command; always sent whole, never streamed.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    Move { joint: usize, deg: f32 },
    Speed { joint: usize, v: f32 },
    Accel { joint: usize, a: f32 },
    Current {
        joint: usize,
        #[serde(rename = "mA")]
        milliamps: f32,
    },
    Micro { joint: usize, u: u32 },
    Home { joint: usize },
    Reset { joint: usize },
}

impl Command {
    pub fn joint(&self) -> usize {
        match self {
            Command::Move { joint, .. }
            | Command::Speed { joint, .. }
            | Command::Accel { joint, .. }
            | Command::Current { joint, .. }
            | Command::Micro { joint, .. }
            | Command::Home { joint }
            | Command::Reset { joint } => *joint,
        }
    }
}

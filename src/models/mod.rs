/*
Typed views over the documents the Harvia cloud returns.

The wire formats are not strictly typed on the server side: numbers show
up as strings, booleans as words like "running" or "standby", and some
keys switch between camelCase and snake_case across firmware versions.
The helpers below coerce those loose values into something usable; the
submodules build the device, state and telemetry models on top of them.
*/

mod device;
mod state;
mod telemetry;

pub use device::{Device, DeviceAttribute, DeviceInfo};
pub use state::{ProfileSettings, SaunaSettings, SaunaState};
pub use telemetry::{TelemetryEnvelope, TelemetryReadings};

use serde_json::Value;

/// Number of profile slots a sauna panel exposes.
pub const PROFILE_SLOTS: u32 = 4;

/// Coerce a loosely typed value into a boolean.
///
/// Accepts booleans, numbers (non-zero is true) and the on/off words the
/// cloud uses for runtime states. Unknown words map to `None` rather than
/// guessing.
pub fn coerce_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|f| f as i64 != 0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "on" | "running" | "active" | "heating" | "started" | "start" => {
                Some(true)
            }
            "0" | "false" | "off" | "inactive" | "stopped" | "stop" | "standby" | "idle"
            | "ready" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

/// Coerce a numeric or numeric-string value into an f64.
pub fn coerce_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Coerce an integer-ish value (number or numeric string) into an i64.
pub fn coerce_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .ok()
            .or_else(|| s.trim().parse::<f64>().ok().map(|f| f as i64)),
        _ => None,
    }
}

/// Render a scalar value as a non-empty string, `None` otherwise.
pub fn coerce_string(value: &Value) -> Option<String> {
    let s = match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}

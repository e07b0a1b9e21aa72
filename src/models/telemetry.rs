use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{coerce_bool, coerce_f64, coerce_string};

/// Measurements from a `/data/latest-data` report.
///
/// The firmware is inconsistent about value encodings, numbers arrive as
/// JSON numbers or strings and flags in half a dozen spellings, so every
/// field is normalized on parse. Power is watts, temperatures degrees
/// Celsius, humidity percent, counters hours and timers minutes.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryReadings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heater_power: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ext_sensor_temp: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub main_sensor_temp: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub panel_temp: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_temp: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hum: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_hum: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_bathing_hours: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_hours: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_sessions: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after_heat_time: Option<f64>,
    #[serde(rename = "ontimeLT", skip_serializing_if = "Option::is_none")]
    pub ontime_lt: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fan_on: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub steam_on: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heat_on: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub light_on: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub safety_relay: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub door_safety_state: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub on_off_trigger: Option<bool>,
}

impl TelemetryReadings {
    fn from_value(value: &Value) -> Self {
        let num = |key: &str| value.get(key).and_then(coerce_f64);
        let flag = |key: &str| value.get(key).and_then(coerce_bool);
        Self {
            heater_power: num("heaterPower"),
            ext_sensor_temp: num("extSensorTemp"),
            main_sensor_temp: num("mainSensorTemp"),
            temp: num("temp"),
            panel_temp: num("panelTemp"),
            target_temp: num("targetTemp"),
            hum: num("hum"),
            target_hum: num("targetHum"),
            total_bathing_hours: num("totalBathingHours"),
            total_hours: num("totalHours"),
            total_sessions: num("totalSessions"),
            on_time: num("onTime"),
            after_heat_time: num("afterHeatTime"),
            ontime_lt: num("ontimeLT"),
            fan_on: flag("fanOn"),
            steam_on: flag("steamOn"),
            heat_on: flag("heatOn"),
            light_on: flag("lightOn"),
            safety_relay: flag("safetyRelay"),
            door_safety_state: flag("doorSafetyState"),
            on_off_trigger: flag("onOffTrigger"),
        }
    }
}

/// A `/data/latest-data` response with its report metadata.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryEnvelope {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shadow_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub_id: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default)]
    pub data: TelemetryReadings,
}

impl TelemetryEnvelope {
    pub fn from_document(doc: &Value) -> Self {
        Self {
            timestamp: doc.get("timestamp").filter(|v| !v.is_null()).cloned(),
            shadow_name: doc.get("shadowName").and_then(coerce_string),
            sub_id: doc.get("subId").and_then(coerce_string),
            kind: doc.get("type").and_then(coerce_string),
            data: doc
                .get("data")
                .map(TelemetryReadings::from_value)
                .unwrap_or_default(),
        }
    }
}

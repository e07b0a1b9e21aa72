use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{coerce_bool, coerce_f64, coerce_i64, coerce_string};

/// One entry of the controller's profile table.
///
/// Profiles are keyed by stringified index ("0".."3") and hold the
/// per-profile setpoints the panel applies when the profile is active.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_temp: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_hum: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heater_on: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub steamer_on: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub light_on: Option<bool>,
}

impl ProfileSettings {
    fn from_value(value: &Value) -> Self {
        Self {
            name: value.get("name").and_then(coerce_string),
            target_temp: value.get("targetTemp").and_then(coerce_f64),
            target_hum: value.get("targetHum").and_then(coerce_f64),
            duration: value.get("duration").and_then(coerce_f64),
            heater_on: value.get("heater").and_then(|h| h.get("on")).and_then(coerce_bool),
            steamer_on: value.get("steamer").and_then(|s| s.get("on")).and_then(coerce_bool),
            light_on: value.get("light").and_then(|l| l.get("on")).and_then(coerce_bool),
        }
    }
}

/// Controller settings block. Times are minutes (the screen saver is
/// seconds), temperatures degrees Celsius. Fields the firmware reports
/// in vendor-specific encodings are kept as raw JSON.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaunaSettings {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_on_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_temp: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_calibration: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screen_saver_time: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blackout_control: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dehumidification: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_control: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock_settings: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock_additional: Option<Value>,
}

impl SaunaSettings {
    fn from_value(value: &Value) -> Self {
        let raw = |key: &str| value.get(key).filter(|v| !v.is_null()).cloned();
        Self {
            max_on_time: value.get("maxOnTime").and_then(coerce_f64),
            max_temp: value.get("maxTemp").and_then(coerce_f64),
            temp_calibration: value.get("tempCalibration").and_then(coerce_f64),
            screen_saver_time: value.get("screenSaverTime").and_then(coerce_f64),
            blackout_control: raw("blackoutControl"),
            dehumidification: raw("dehumidification"),
            remote_control: raw("remoteControl"),
            lock_settings: raw("lockSettings"),
            lock_additional: raw("lockAdditional"),
        }
    }
}

/// Normalized view of a `/devices/state` document.
///
/// The cloud reports setpoints both at the document root and inside the
/// active profile. When a profile is active its values win; heater and
/// steamer run states are only meaningful at the root.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaunaState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connected: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sauna_status: Option<Value>,
    /// On/off judged from `sauna_status`, `None` when the word is unknown.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub power_on: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_profile: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_temp: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_hum: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heater_on: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub steamer_on: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub light_on: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heater_state: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub steamer_state: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub screen_lock_on: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_allowed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub demo_mode: Option<bool>,
    #[serde(default)]
    pub settings: SaunaSettings,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub profiles: BTreeMap<String, ProfileSettings>,
}

impl SaunaState {
    /// Normalize a raw state document as returned by the cloud, shaped
    /// `{"state": {...}, "connectionState": {"connected": ...}}`.
    pub fn from_document(doc: &Value) -> Self {
        let null = Value::Null;
        let state = doc.get("state").unwrap_or(&null);
        let raw = |key: &str| state.get(key).filter(|v| !v.is_null()).cloned();

        let connected = doc
            .get("connectionState")
            .and_then(|c| c.get("connected"))
            .and_then(coerce_bool);

        let profiles: BTreeMap<String, ProfileSettings> = state
            .get("profiles")
            .and_then(Value::as_object)
            .map(|map| {
                map.iter()
                    .map(|(key, value)| (key.clone(), ProfileSettings::from_value(value)))
                    .collect()
            })
            .unwrap_or_default();

        let active_profile = state.get("activeProfile").and_then(coerce_i64);
        let active = active_profile
            .map(|idx| idx.to_string())
            .and_then(|key| profiles.get(&key))
            .cloned()
            .unwrap_or_default();

        let target_temp = active
            .target_temp
            .or_else(|| state.get("targetTemp").and_then(coerce_f64));
        let target_hum = active
            .target_hum
            .or_else(|| state.get("targetHum").and_then(coerce_f64));
        let heater_on = active
            .heater_on
            .or_else(|| state.get("heater").and_then(|h| h.get("on")).and_then(coerce_bool));
        let steamer_on = active
            .steamer_on
            .or_else(|| state.get("steamer").and_then(|s| s.get("on")).and_then(coerce_bool));
        let light_on = active
            .light_on
            .or_else(|| state.get("light").and_then(|l| l.get("on")).and_then(coerce_bool));

        let sauna_status = raw("saunaStatus");
        let power_on = sauna_status.as_ref().and_then(coerce_bool);

        Self {
            connected,
            display_name: state.get("displayName").and_then(coerce_string),
            sauna_status,
            power_on,
            active_profile,
            target_temp,
            target_hum,
            heater_on,
            steamer_on,
            light_on,
            heater_state: state
                .get("heater")
                .and_then(|h| h.get("state"))
                .filter(|v| !v.is_null())
                .cloned(),
            steamer_state: state
                .get("steamer")
                .and_then(|s| s.get("state"))
                .filter(|v| !v.is_null())
                .cloned(),
            screen_lock_on: state
                .get("screenLock")
                .and_then(|s| s.get("on"))
                .and_then(coerce_bool),
            remote_allowed: state.get("remoteAllowed").and_then(coerce_bool),
            demo_mode: state.get("demoMode").and_then(coerce_bool),
            settings: state
                .get("settings")
                .map(SaunaSettings::from_value)
                .unwrap_or_default(),
            profiles,
        }
    }
}

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::coerce_string;

/// A key/value attribute from the `/devices` listing.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceAttribute {
    pub key: String,
    #[serde(default)]
    pub value: Value,
}

/// A sauna controller registered to the account.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub id: String,

    /// Controller type, eg. "Fenix"
    #[serde(rename = "type", default)]
    pub kind: String,

    pub name: String,

    #[serde(default)]
    pub attr: Vec<DeviceAttribute>,
}

impl Device {
    /// Parse the `/devices` payload into a device list.
    ///
    /// The endpoint returns either `{"devices": [...]}` or a bare array.
    /// Entries without a usable identifier are dropped; the identifier is
    /// the first non-empty of `id`, `deviceId` and `name`.
    pub fn from_listing(payload: &Value) -> Vec<Device> {
        let raw = match payload {
            Value::Object(map) => map.get("devices").unwrap_or(payload),
            _ => payload,
        };

        let Some(items) = raw.as_array() else {
            return Vec::new();
        };

        items
            .iter()
            .filter_map(|item| {
                let obj = item.as_object()?;

                let id = ["id", "deviceId", "name"]
                    .iter()
                    .filter_map(|k| obj.get(*k))
                    .find_map(coerce_string)?;

                let kind = obj.get("type").and_then(coerce_string).unwrap_or_default();
                let name = obj
                    .get("name")
                    .and_then(coerce_string)
                    .unwrap_or_else(|| id.clone());

                let attr = obj
                    .get("attr")
                    .or_else(|| obj.get("attributes"))
                    .and_then(Value::as_array)
                    .map(|list| {
                        list.iter()
                            .filter_map(|entry| {
                                let entry = entry.as_object()?;
                                let key = entry.get("key").and_then(coerce_string)?;
                                let value = entry.get("value").cloned().unwrap_or(Value::Null);
                                Some(DeviceAttribute { key, value })
                            })
                            .collect()
                    })
                    .unwrap_or_default();

                Some(Device {
                    id,
                    kind,
                    name,
                    attr,
                })
            })
            .collect()
    }

    /// Look up an attribute by key, rendered as a non-empty string.
    pub fn attribute(&self, key: &str) -> Option<String> {
        self.attr
            .iter()
            .find(|a| a.key == key)
            .and_then(|a| coerce_string(&a.value))
    }
}

/// Summary of a device suitable for display, derived from the attribute
/// list the cloud attaches to each controller.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub id: String,
    pub name: String,
    pub manufacturer: String,
    pub model: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub serial_number: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub hw_version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sw_version: Option<String>,
}

impl DeviceInfo {
    pub fn for_device(device: &Device) -> Self {
        let serial_number = device.attribute("serialNumber");
        let hw_version = device
            .attribute("HWID")
            .or_else(|| device.attribute("powerUnitHWID"));
        let sw_version = device
            .attribute("powerUnitFwVersion")
            .or_else(|| device.attribute("initialFirmware"));

        let mut model = device.kind.clone();
        let mut details = Vec::new();
        if let Some(panel) = device.attribute("panelType") {
            details.push(format!("Panel {panel}"));
        }
        if let Some(variant) = device.attribute("powerUnitVariant") {
            details.push(format!("PU {variant}"));
        }
        if !details.is_empty() {
            model = format!("{model} ({})", details.join(" / "));
        }

        let label = if device.kind.is_empty() {
            device.id.as_str()
        } else {
            device.kind.as_str()
        };

        Self {
            id: device.id.clone(),
            name: format!("Harvia {label}"),
            manufacturer: "Harvia".to_string(),
            model,
            serial_number,
            hw_version,
            sw_version,
        }
    }
}

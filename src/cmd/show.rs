use anyhow::{bail, Result};
use serde_json::Value;

use crate::config::Config;
use crate::models::DeviceInfo;

/// List the account's devices with their derived summaries.
pub async fn devices(config: Config) -> Result<()> {
    let client = super::connect(&config).await?;

    let devices = client.devices().await?;
    if devices.is_empty() {
        bail!("no devices registered to this account");
    }

    let listing = devices
        .iter()
        .map(|device| {
            let mut entry = serde_json::to_value(device)?;
            entry["info"] = serde_json::to_value(DeviceInfo::for_device(device))?;
            Ok(entry)
        })
        .collect::<Result<Vec<Value>, serde_json::Error>>()?;

    println!("{}", serde_json::to_string_pretty(&listing)?);
    Ok(())
}

/// Print a device's normalized reported state.
pub async fn state(config: Config, device_id: &str) -> Result<()> {
    let client = super::connect(&config).await?;
    let sauna = client.device_state(device_id).await?;
    println!("{}", serde_json::to_string_pretty(&sauna)?);
    Ok(())
}

/// Print a device's latest measurement report.
pub async fn data(config: Config, device_id: &str) -> Result<()> {
    let client = super::connect(&config).await?;
    let telemetry = client.latest_data(device_id).await?;
    println!("{}", serde_json::to_string_pretty(&telemetry)?);
    Ok(())
}

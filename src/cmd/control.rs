use std::time::Duration;

use anyhow::{bail, Result};
use tokio::time::sleep;

use crate::config::Config;
use crate::models::PROFILE_SLOTS;

/// How long to wait after a command before reading the state back. The
/// cloud takes a few seconds to reflect a command.
const SETTLE_DELAY: Duration = Duration::from_secs(3);

/// Switch the sauna on or off, then print the state it settled on.
pub async fn power(config: Config, device_id: &str, on: bool) -> Result<()> {
    let client = super::connect(&config).await?;

    client.set_power(device_id, on).await?;

    sleep(SETTLE_DELAY).await;
    let sauna = client.device_state(device_id).await?;
    println!("{}", serde_json::to_string_pretty(&sauna)?);
    Ok(())
}

/// Select the active profile slot, then print the state it settled on.
pub async fn profile(config: Config, device_id: &str, index: u32) -> Result<()> {
    let client = super::connect(&config).await?;

    let sauna = client.device_state(device_id).await?;
    let known = if sauna.profiles.is_empty() {
        index < PROFILE_SLOTS
    } else {
        sauna.profiles.contains_key(&index.to_string())
    };
    if !known {
        if sauna.profiles.is_empty() {
            bail!("unknown profile {index}, panels expose slots 0 to {}", PROFILE_SLOTS - 1);
        }
        let slots: Vec<&str> = sauna.profiles.keys().map(String::as_str).collect();
        bail!("unknown profile {index}, available slots: {}", slots.join(", "));
    }

    client.set_active_profile(device_id, index).await?;

    sleep(SETTLE_DELAY).await;
    let sauna = client.device_state(device_id).await?;
    println!("{}", serde_json::to_string_pretty(&sauna)?);
    Ok(())
}

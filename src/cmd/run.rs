use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::api;
use crate::config::Config;
use crate::poll::{self, RefreshRequest};
use crate::snapshot::{Snapshot, SnapshotStore};

/// Run the polling agent: connect to the cloud, seed the snapshot with
/// the account's devices and serve the local API while both pollers
/// keep the snapshot fresh.
#[instrument(name = "agent", skip_all, err)]
pub async fn run(config: Config) -> Result<()> {
    // Try to bind to the API address first, this avoids a round trip to
    // the cloud if the local port is taken
    let listener = TcpListener::bind(config.local_api_address)
        .await
        .with_context(|| format!("failed to bind {}", config.local_api_address))?;
    debug!("bound to local address {}", config.local_api_address);

    let client = Arc::new(super::connect(&config).await?);

    let devices = client.devices().await?;
    if devices.is_empty() {
        warn!("no devices registered to this account");
    } else {
        info!(count = devices.len(), "discovered devices");
    }

    let store = SnapshotStore::new(Snapshot::with_devices(devices));
    let (refresh_tx, refresh_rx) = watch::channel(RefreshRequest);

    // Start the API and the pollers and terminate when any of them does
    tokio::select! {
        _ = api::start(listener, store.subscribe(), refresh_tx, client.clone()) => Ok(()),
        _ = poll::start_state_poll(
            client.clone(),
            store.clone(),
            config.poll,
            refresh_rx.clone(),
        ) => Ok(()),
        _ = poll::start_telemetry_poll(client, store, config.poll, refresh_rx) => Ok(()),
    }
}

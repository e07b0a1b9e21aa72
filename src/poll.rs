use std::cmp;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::select;
use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, instrument, warn};

use crate::config::PollConfig;
use crate::remote::{ClientError, HarviaClient};
use crate::snapshot::SnapshotStore;

/// Marker sent over a watch channel to request an immediate poll round
/// on both pollers.
#[derive(Clone, Copy, Debug, Default)]
pub struct RefreshRequest;

/// Exponential backoff between failed poll rounds, doubling up to a
/// configured ceiling.
struct Backoff {
    current: Duration,
    min: Duration,
    max: Duration,
}

impl Backoff {
    fn new(min: Duration, max: Duration) -> Self {
        Self { current: min, min, max }
    }

    fn reset(&mut self) {
        self.current = self.min;
    }

    fn next(&mut self) -> Duration {
        self.current = cmp::min(self.current * 2, self.max);
        self.current
    }
}

/// A random delay up to `max`, spreading poll rounds so restarts do not
/// hit the cloud in lockstep.
fn jitter(max: Duration) -> Duration {
    if max.is_zero() {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::random_range(0..=max.as_millis() as u64))
}

/// Poll reported device states on the configured cadence. An incoming
/// [`RefreshRequest`] short-circuits the wait; the loop ends when the
/// request channel closes.
pub async fn start_state_poll(
    client: Arc<HarviaClient>,
    store: SnapshotStore,
    config: PollConfig,
    mut refresh: watch::Receiver<RefreshRequest>,
) {
    info!(interval = ?config.state_interval, "starting state poll");

    let mut backoff = Backoff::new(config.min_interval, config.max_backoff);
    let mut deadline = Instant::now();

    loop {
        select! {
            _ = sleep_until(deadline) => {}
            changed = refresh.changed() => match changed {
                Ok(()) => {
                    debug!("state poll requested");
                    deadline = Instant::now();
                    continue;
                }
                Err(_) => break,
            }
        }

        match poll_states(&client, &store).await {
            Ok(()) => {
                backoff.reset();
                deadline = Instant::now() + config.state_interval + jitter(config.max_jitter);
            }
            Err(err @ ClientError::Auth(_)) => {
                // retrying sooner will not fix rejected credentials
                error!("state poll authentication failed: {err}");
                store.update(|snapshot| snapshot.stats.state_poll.record_error(&err));
                deadline = Instant::now() + config.max_backoff + jitter(config.max_jitter);
            }
            Err(err) => {
                warn!("state poll failed: {err}");
                store.update(|snapshot| snapshot.stats.state_poll.record_error(&err));
                deadline = Instant::now() + backoff.next();
            }
        }
    }

    debug!("state poll stopped");
}

/// Poll latest measurement reports, usually on a faster cadence than
/// the state poll.
pub async fn start_telemetry_poll(
    client: Arc<HarviaClient>,
    store: SnapshotStore,
    config: PollConfig,
    mut refresh: watch::Receiver<RefreshRequest>,
) {
    info!(interval = ?config.telemetry_interval, "starting telemetry poll");

    let mut backoff = Backoff::new(config.min_interval, config.max_backoff);
    let mut deadline = Instant::now();

    loop {
        select! {
            _ = sleep_until(deadline) => {}
            changed = refresh.changed() => match changed {
                Ok(()) => {
                    debug!("telemetry poll requested");
                    deadline = Instant::now();
                    continue;
                }
                Err(_) => break,
            }
        }

        match poll_telemetry(&client, &store).await {
            Ok(()) => {
                backoff.reset();
                deadline = Instant::now() + config.telemetry_interval + jitter(config.max_jitter);
            }
            Err(err @ ClientError::Auth(_)) => {
                error!("telemetry poll authentication failed: {err}");
                store.update(|snapshot| snapshot.stats.telemetry_poll.record_error(&err));
                deadline = Instant::now() + config.max_backoff + jitter(config.max_jitter);
            }
            Err(err) => {
                warn!("telemetry poll failed: {err}");
                store.update(|snapshot| snapshot.stats.telemetry_poll.record_error(&err));
                deadline = Instant::now() + backoff.next();
            }
        }
    }

    debug!("telemetry poll stopped");
}

/// One state round: refresh the device list, then fetch every device's
/// reported state and swap the result in. A failure anywhere keeps the
/// previous snapshot.
#[instrument(name = "state_poll", skip_all)]
async fn poll_states(client: &HarviaClient, store: &SnapshotStore) -> Result<(), ClientError> {
    let devices = client.devices().await?;

    let mut states = HashMap::with_capacity(devices.len());
    for device in &devices {
        let state = client.device_state(&device.id).await?;
        states.insert(device.id.clone(), state);
    }

    store.update(|snapshot| {
        snapshot.devices = devices;
        snapshot.states = states;
        snapshot.stats.state_poll.record_success();
    });
    Ok(())
}

#[instrument(name = "telemetry_poll", skip_all)]
async fn poll_telemetry(client: &HarviaClient, store: &SnapshotStore) -> Result<(), ClientError> {
    let device_ids: Vec<String> = store.current().devices.iter().map(|d| d.id.clone()).collect();

    let mut telemetry = HashMap::with_capacity(device_ids.len());
    for device_id in &device_ids {
        let envelope = client.latest_data(device_id).await?;
        telemetry.insert(device_id.clone(), envelope);
    }

    store.update(|snapshot| {
        snapshot.telemetry = telemetry;
        snapshot.stats.telemetry_poll.record_success();
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Device;
    use crate::remote::{Credentials, Endpoints, Session};
    use crate::snapshot::Snapshot;
    use mockito::{Mock, Server, ServerGuard};
    use serde_json::json;
    use tokio::time::sleep;

    fn client_for(server: &ServerGuard) -> Arc<HarviaClient> {
        let http = reqwest::Client::new();
        let endpoints = Endpoints {
            generics_base: server.url(),
            device_base: server.url(),
        };
        let session = Session::new(
            http.clone(),
            server.url(),
            Credentials::new("user@example.com", "hunter2"),
        );
        Arc::new(HarviaClient::new(http, endpoints, session))
    }

    async fn login_mock(server: &mut ServerGuard) -> Mock {
        server
            .mock("POST", "/auth/token")
            .with_header("content-type", "application/json")
            .with_body(json!({"idToken": "id-1", "expiresIn": 3600}).to_string())
            .create_async()
            .await
    }

    fn seeded_store() -> SnapshotStore {
        let mut snapshot = Snapshot::with_devices(vec![Device {
            id: "sauna-1".into(),
            ..Default::default()
        }]);
        snapshot
            .states
            .insert("sauna-1".into(), Default::default());
        SnapshotStore::new(snapshot)
    }

    fn fast_config() -> PollConfig {
        PollConfig {
            state_interval: Duration::from_secs(3600),
            telemetry_interval: Duration::from_secs(3600),
            min_interval: Duration::from_millis(10),
            max_backoff: Duration::from_secs(3600),
            max_jitter: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn test_state_round_updates_snapshot() {
        let mut server = Server::new_async().await;
        let _login = login_mock(&mut server).await;

        let listing = server
            .mock("GET", "/devices")
            .with_header("content-type", "application/json")
            .with_body(json!([{"id": "sauna-1", "type": "Fenix"}]).to_string())
            .create_async()
            .await;
        let state = server
            .mock("GET", "/devices/state")
            .match_query(mockito::Matcher::UrlEncoded("deviceId".into(), "sauna-1".into()))
            .with_header("content-type", "application/json")
            .with_body(
                json!({"state": {"targetTemp": 80}, "connectionState": {"connected": true}})
                    .to_string(),
            )
            .create_async()
            .await;

        let store = SnapshotStore::new(Snapshot::default());
        poll_states(&client_for(&server), &store).await.unwrap();

        listing.assert_async().await;
        state.assert_async().await;

        let snapshot = store.current();
        assert_eq!(snapshot.devices.len(), 1);
        assert_eq!(snapshot.states["sauna-1"].target_temp, Some(80.0));
        assert_eq!(snapshot.stats.state_poll.success_count, 1);
    }

    #[tokio::test]
    async fn test_failed_round_keeps_previous_snapshot() {
        let mut server = Server::new_async().await;
        let _login = login_mock(&mut server).await;

        let listing = server
            .mock("GET", "/devices")
            .with_status(500)
            .with_body("boom")
            .create_async()
            .await;

        let store = seeded_store();
        let err = poll_states(&client_for(&server), &store).await.unwrap_err();
        assert!(matches!(err, ClientError::Status(..)));

        listing.assert_async().await;

        // the round failed, the devices and states from before stay up
        let snapshot = store.current();
        assert_eq!(snapshot.devices.len(), 1);
        assert!(snapshot.states.contains_key("sauna-1"));
        assert_eq!(snapshot.stats.state_poll.success_count, 0);
    }

    #[tokio::test]
    async fn test_telemetry_round_covers_known_devices() {
        let mut server = Server::new_async().await;
        let _login = login_mock(&mut server).await;

        let data = server
            .mock("GET", "/data/latest-data")
            .match_query(mockito::Matcher::UrlEncoded("deviceId".into(), "sauna-1".into()))
            .with_header("content-type", "application/json")
            .with_body(json!({"data": {"temp": 61}}).to_string())
            .create_async()
            .await;

        let store = seeded_store();
        poll_telemetry(&client_for(&server), &store).await.unwrap();

        data.assert_async().await;

        let snapshot = store.current();
        assert_eq!(snapshot.telemetry["sauna-1"].data.temp, Some(61.0));
        assert_eq!(snapshot.stats.telemetry_poll.success_count, 1);
    }

    #[tokio::test]
    async fn test_refresh_request_short_circuits_wait() {
        let mut server = Server::new_async().await;
        let _login = login_mock(&mut server).await;

        let data = server
            .mock("GET", "/data/latest-data")
            .match_query(mockito::Matcher::Any)
            .with_header("content-type", "application/json")
            .with_body(json!({"data": {}}).to_string())
            .expect(2)
            .create_async()
            .await;

        let store = seeded_store();
        let (refresh_tx, refresh_rx) = watch::channel(RefreshRequest);
        // the interval is an hour, a second round can only come from
        // the refresh request
        tokio::spawn(start_telemetry_poll(
            client_for(&server),
            store.clone(),
            fast_config(),
            refresh_rx,
        ));

        sleep(Duration::from_millis(300)).await;
        assert_eq!(store.current().stats.telemetry_poll.success_count, 1);

        refresh_tx.send(RefreshRequest).unwrap();
        sleep(Duration::from_millis(300)).await;

        data.assert_async().await;
        assert_eq!(store.current().stats.telemetry_poll.success_count, 2);
    }

    #[tokio::test]
    async fn test_auth_rejection_parks_the_poller() {
        let mut server = Server::new_async().await;

        let login = server
            .mock("POST", "/auth/token")
            .with_status(401)
            .with_body("bad credentials")
            .expect(1)
            .create_async()
            .await;

        let store = seeded_store();
        let (_refresh_tx, refresh_rx) = watch::channel(RefreshRequest);
        tokio::spawn(start_telemetry_poll(
            client_for(&server),
            store.clone(),
            fast_config(),
            refresh_rx,
        ));

        // with the backoff ceiling at an hour, a parked poller makes no
        // further login attempts in this window
        sleep(Duration::from_millis(300)).await;

        login.assert_async().await;
        let stats = store.current().stats.telemetry_poll;
        assert_eq!(stats.error_count, 1);
        assert!(stats.last_error.unwrap().contains("rejected"));
    }

    #[tokio::test]
    async fn test_transport_errors_retry_on_backoff() {
        let mut server = Server::new_async().await;
        let _login = login_mock(&mut server).await;

        let data = server
            .mock("GET", "/data/latest-data")
            .match_query(mockito::Matcher::Any)
            .with_status(500)
            .with_body("boom")
            .expect_at_least(2)
            .create_async()
            .await;

        let store = seeded_store();
        let (_refresh_tx, refresh_rx) = watch::channel(RefreshRequest);
        tokio::spawn(start_telemetry_poll(
            client_for(&server),
            store.clone(),
            fast_config(),
            refresh_rx,
        ));

        // unlike a credential rejection, plain failures keep retrying,
        // starting from the minimum interval
        sleep(Duration::from_millis(300)).await;

        data.assert_async().await;
        assert!(store.current().stats.telemetry_poll.error_count >= 2);
    }

    #[test]
    fn test_backoff_doubles_up_to_max() {
        let mut backoff = Backoff::new(Duration::from_secs(5), Duration::from_secs(30));

        assert_eq!(backoff.next(), Duration::from_secs(10));
        assert_eq!(backoff.next(), Duration::from_secs(20));
        assert_eq!(backoff.next(), Duration::from_secs(30));
        // capped
        assert_eq!(backoff.next(), Duration::from_secs(30));

        backoff.reset();
        assert_eq!(backoff.next(), Duration::from_secs(10));
    }

    #[test]
    fn test_jitter_bounds() {
        let max = Duration::from_millis(250);
        for _ in 0..100 {
            assert!(jitter(max) <= max);
        }
        assert_eq!(jitter(Duration::ZERO), Duration::ZERO);
    }
}

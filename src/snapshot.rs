use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tokio::sync::watch;

use crate::models::{Device, SaunaState, TelemetryEnvelope};

/// Health counters for one polling loop.
#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollerStats {
    pub success_count: u64,
    pub error_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_success_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl PollerStats {
    pub fn record_success(&mut self) {
        self.success_count += 1;
        self.last_success_ms = Some(epoch_ms());
        self.last_error = None;
    }

    pub fn record_error(&mut self, error: impl ToString) {
        self.error_count += 1;
        self.last_error = Some(error.to_string());
    }
}

#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStats {
    pub state_poll: PollerStats,
    pub telemetry_poll: PollerStats,
}

/// Everything the agent currently knows about the account's devices.
///
/// A single writer side lives with the pollers, readers get a cheap
/// clone through a watch channel whenever something changed.
#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub devices: Vec<Device>,
    pub states: HashMap<String, SaunaState>,
    pub telemetry: HashMap<String, TelemetryEnvelope>,
    pub stats: AgentStats,
}

impl Snapshot {
    pub fn with_devices(devices: Vec<Device>) -> Self {
        Self {
            devices,
            ..Default::default()
        }
    }

    pub fn device(&self, device_id: &str) -> Option<&Device> {
        self.devices.iter().find(|d| d.id == device_id)
    }
}

/// Writer handle over the shared snapshot.
#[derive(Clone)]
pub struct SnapshotStore {
    tx: watch::Sender<Snapshot>,
}

impl SnapshotStore {
    pub fn new(snapshot: Snapshot) -> Self {
        let (tx, _) = watch::channel(snapshot);
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.tx.subscribe()
    }

    /// Mutate the snapshot in place and notify all subscribers.
    pub fn update(&self, update: impl FnOnce(&mut Snapshot)) {
        self.tx.send_modify(update);
    }

    pub fn current(&self) -> Snapshot {
        self.tx.borrow().clone()
    }
}

fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_update_notifies_subscribers() {
        let store = SnapshotStore::new(Snapshot::default());
        let rx = store.subscribe();

        store.update(|snapshot| {
            snapshot.devices.push(Device {
                id: "sauna-1".into(),
                ..Default::default()
            });
            snapshot.stats.state_poll.record_success();
        });

        let seen = rx.borrow();
        assert_eq!(seen.devices.len(), 1);
        assert!(seen.device("sauna-1").is_some());
        assert!(seen.device("sauna-2").is_none());
        assert_eq!(seen.stats.state_poll.success_count, 1);
    }

    #[test]
    fn test_stats_recording() {
        let mut stats = PollerStats::default();

        stats.record_error("connection reset");
        assert_eq!(stats.error_count, 1);
        assert_eq!(stats.last_error.as_deref(), Some("connection reset"));
        assert_eq!(stats.last_success_ms, None);

        // a success clears the sticky error
        stats.record_success();
        assert_eq!(stats.success_count, 1);
        assert_eq!(stats.last_error, None);
        assert!(stats.last_success_ms.is_some());
    }

    #[test]
    fn test_serialized_shape() {
        let mut snapshot = Snapshot::with_devices(vec![Device {
            id: "sauna-1".into(),
            kind: "Fenix".into(),
            name: "Sauna".into(),
            attr: Vec::new(),
        }]);
        snapshot.states.insert("sauna-1".into(), SaunaState::default());
        snapshot.stats.telemetry_poll.record_error("timed out");

        let out = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(out["devices"][0]["type"], json!("Fenix"));
        assert_eq!(out["stats"]["telemetryPoll"]["errorCount"], json!(1));
        assert_eq!(out["stats"]["telemetryPoll"]["lastError"], json!("timed out"));
    }
}

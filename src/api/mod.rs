use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{Request, Response, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::time::sleep;
use tower_http::trace::TraceLayer;
use tracing::{
    debug_span,
    field::{display, Empty},
    info, instrument, Span,
};

use crate::models::{Device, DeviceInfo, PROFILE_SLOTS, SaunaState, TelemetryEnvelope};
use crate::poll::RefreshRequest;
use crate::remote::{ClientMetrics, HarviaClient};
use crate::snapshot::{AgentStats, Snapshot};

/// Delays between the follow-up poll rounds after a command. The cloud
/// takes a few seconds to reflect a command in the reported state.
const COMMAND_BURST_DELAYS: [Duration; 2] = [Duration::from_secs(3), Duration::from_secs(6)];

#[derive(Clone)]
struct ApiState {
    /// Latest snapshot from the pollers.
    snapshot: watch::Receiver<Snapshot>,

    /// Channel to ask the pollers for an immediate round.
    refresh: watch::Sender<RefreshRequest>,

    /// Shared cloud client for commands.
    client: Arc<HarviaClient>,
}

#[derive(Serialize)]
struct DeviceEntry {
    #[serde(flatten)]
    device: Device,
    info: DeviceInfo,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    devices: usize,
    stats: AgentStats,
    cloud: ClientMetrics,
}

#[derive(Debug, Deserialize)]
struct PowerRequest {
    on: bool,
}

#[derive(Debug, Deserialize)]
struct ProfileRequest {
    profile: u32,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

type HandlerError = (StatusCode, Json<ErrorBody>);

fn error_body(status: StatusCode, error: impl ToString) -> HandlerError {
    (
        status,
        Json(ErrorBody {
            error: error.to_string(),
        }),
    )
}

/// Start the API
///
/// Receives a TCP listener already bound to the right address and port,
/// and the shared handles to forward to request handlers.
#[instrument(name = "api", skip_all)]
pub async fn start(
    listener: TcpListener,
    snapshot_rx: watch::Receiver<Snapshot>,
    refresh_tx: watch::Sender<RefreshRequest>,
    client: Arc<HarviaClient>,
) {
    let api_span = Span::current();
    let state = ApiState {
        snapshot: snapshot_rx,
        refresh: refresh_tx,
        client,
    };

    let app = Router::new()
        .route("/v1/ping", get(|| async { "OK" }))
        .route("/v1/status", get(agent_status))
        .route("/v1/devices", get(list_devices))
        .route("/v1/devices/{device_id}/state", get(device_state))
        .route("/v1/devices/{device_id}/telemetry", get(device_telemetry))
        .route("/v1/devices/{device_id}/power", post(set_power))
        .route("/v1/devices/{device_id}/profile", post(set_profile))
        .route("/v1/poll", post(trigger_poll));

    // Enable tracing
    let app = app.layer(
        TraceLayer::new_for_http()
            .make_span_with(move |request: &Request<Body>| {
                debug_span!(parent: &api_span, "request",
                    method = %request.method(),
                    uri = %request.uri().path(),
                    version = ?request.version(),
                    status = Empty,
                )
            })
            .on_response(|response: &Response<Body>, _: Duration, span: &Span| {
                span.record("status", display(response.status()));
            }),
    );

    // Assign state
    let app = app.with_state(state);

    info!("ready");

    // safe because `serve` will never return an error (or return at all).
    axum::serve(listener, app).await.unwrap()
}

/// Handle `GET /v1/devices`
///
/// Lists the account's devices from the snapshot, each with the summary
/// derived from its attributes.
async fn list_devices(State(state): State<ApiState>) -> Json<Vec<DeviceEntry>> {
    let snapshot = state.snapshot.borrow();
    Json(
        snapshot
            .devices
            .iter()
            .map(|device| DeviceEntry {
                info: DeviceInfo::for_device(device),
                device: device.clone(),
            })
            .collect(),
    )
}

/// Handle `GET /v1/devices/{device_id}/state`
///
/// 404 for devices we do not know, 503 for known devices the state poll
/// has not covered yet.
async fn device_state(
    State(state): State<ApiState>,
    Path(device_id): Path<String>,
) -> Result<Json<SaunaState>, HandlerError> {
    let snapshot = state.snapshot.borrow();
    if snapshot.device(&device_id).is_none() {
        return Err(error_body(StatusCode::NOT_FOUND, "unknown device"));
    }
    match snapshot.states.get(&device_id) {
        Some(sauna) => Ok(Json(sauna.clone())),
        None => Err(error_body(
            StatusCode::SERVICE_UNAVAILABLE,
            "device state not polled yet",
        )),
    }
}

/// Handle `GET /v1/devices/{device_id}/telemetry`
async fn device_telemetry(
    State(state): State<ApiState>,
    Path(device_id): Path<String>,
) -> Result<Json<TelemetryEnvelope>, HandlerError> {
    let snapshot = state.snapshot.borrow();
    if snapshot.device(&device_id).is_none() {
        return Err(error_body(StatusCode::NOT_FOUND, "unknown device"));
    }
    match snapshot.telemetry.get(&device_id) {
        Some(telemetry) => Ok(Json(telemetry.clone())),
        None => Err(error_body(
            StatusCode::SERVICE_UNAVAILABLE,
            "device telemetry not polled yet",
        )),
    }
}

/// Handle `GET /v1/status`
async fn agent_status(State(state): State<ApiState>) -> Json<StatusResponse> {
    let snapshot = state.snapshot.borrow();
    Json(StatusResponse {
        devices: snapshot.devices.len(),
        stats: snapshot.stats.clone(),
        cloud: state.client.metrics(),
    })
}

/// Handle `POST /v1/poll`
///
/// Asks both pollers for an immediate round.
async fn trigger_poll(State(state): State<ApiState>) -> StatusCode {
    if state.refresh.send(RefreshRequest).is_err() {
        return StatusCode::SERVICE_UNAVAILABLE;
    }

    StatusCode::ACCEPTED
}

/// Handle `POST /v1/devices/{device_id}/power`
///
/// Forwards the switch command to the cloud, then polls a few times
/// while the controller settles.
async fn set_power(
    State(state): State<ApiState>,
    Path(device_id): Path<String>,
    Json(request): Json<PowerRequest>,
) -> Result<StatusCode, HandlerError> {
    if state.snapshot.borrow().device(&device_id).is_none() {
        return Err(error_body(StatusCode::NOT_FOUND, "unknown device"));
    }

    state
        .client
        .set_power(&device_id, request.on)
        .await
        .map_err(|err| error_body(StatusCode::BAD_GATEWAY, err))?;

    send_refresh_burst(state.refresh.clone());
    Ok(StatusCode::ACCEPTED)
}

/// Handle `POST /v1/devices/{device_id}/profile`
async fn set_profile(
    State(state): State<ApiState>,
    Path(device_id): Path<String>,
    Json(request): Json<ProfileRequest>,
) -> Result<StatusCode, HandlerError> {
    {
        let snapshot = state.snapshot.borrow();
        if snapshot.device(&device_id).is_none() {
            return Err(error_body(StatusCode::NOT_FOUND, "unknown device"));
        }

        let Some(sauna) = snapshot.states.get(&device_id) else {
            return Err(error_body(
                StatusCode::SERVICE_UNAVAILABLE,
                "device state not polled yet",
            ));
        };

        let known = if sauna.profiles.is_empty() {
            request.profile < PROFILE_SLOTS
        } else {
            sauna.profiles.contains_key(&request.profile.to_string())
        };
        if !known {
            return Err(error_body(
                StatusCode::BAD_REQUEST,
                format!("unknown profile {}", request.profile),
            ));
        }
    }

    state
        .client
        .set_active_profile(&device_id, request.profile)
        .await
        .map_err(|err| error_body(StatusCode::BAD_GATEWAY, err))?;

    send_refresh_burst(state.refresh.clone());
    Ok(StatusCode::ACCEPTED)
}

/// One poll round right away, then a couple more while the cloud
/// catches up with the command.
fn send_refresh_burst(refresh: watch::Sender<RefreshRequest>) {
    let _ = refresh.send(RefreshRequest);
    tokio::spawn(async move {
        for delay in COMMAND_BURST_DELAYS {
            sleep(delay).await;
            if refresh.send(RefreshRequest).is_err() {
                break;
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::{Credentials, Endpoints, Session};
    use crate::snapshot::SnapshotStore;
    use mockito::{Matcher, Server, ServerGuard};
    use serde_json::json;

    fn test_client(server: &ServerGuard) -> Arc<HarviaClient> {
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

    fn test_snapshot() -> Snapshot {
        let mut snapshot = Snapshot::with_devices(vec![Device {
            id: "sauna-1".into(),
            kind: "Fenix".into(),
            name: "Sauna".into(),
            attr: vec![crate::models::DeviceAttribute {
                key: "serialNumber".into(),
                value: json!("HF12345"),
            }],
        }]);
        snapshot.states.insert(
            "sauna-1".into(),
            SaunaState::from_document(&json!({
                "state": {
                    "targetTemp": 80,
                    "activeProfile": 0,
                    "profiles": {"0": {"name": "Quick"}, "1": {"name": "Evening"}}
                },
                "connectionState": {"connected": true}
            })),
        );
        snapshot
            .telemetry
            .insert("sauna-1".into(), TelemetryEnvelope::default());
        snapshot
    }

    async fn setup_test_server(
        snapshot: Snapshot,
        client: Arc<HarviaClient>,
    ) -> (u16, watch::Receiver<RefreshRequest>) {
        let store = SnapshotStore::new(snapshot);
        let (refresh_tx, refresh_rx) = watch::channel(RefreshRequest);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(start(listener, store.subscribe(), refresh_tx, client));

        tokio::time::sleep(Duration::from_millis(10)).await;

        (port, refresh_rx)
    }

    #[tokio::test]
    async fn test_ping() {
        let server = Server::new_async().await;
        let (port, _refresh_rx) = setup_test_server(test_snapshot(), test_client(&server)).await;

        let response = reqwest::get(format!("http://127.0.0.1:{port}/v1/ping"))
            .await
            .unwrap();

        assert_eq!(response.status(), 200);
        assert_eq!(response.text().await.unwrap(), "OK");
    }

    #[tokio::test]
    async fn test_list_devices() {
        let server = Server::new_async().await;
        let (port, _refresh_rx) = setup_test_server(test_snapshot(), test_client(&server)).await;

        let response = reqwest::get(format!("http://127.0.0.1:{port}/v1/devices"))
            .await
            .unwrap();

        assert_eq!(response.status(), 200);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body[0]["id"], json!("sauna-1"));
        assert_eq!(body[0]["type"], json!("Fenix"));
        assert_eq!(body[0]["info"]["serialNumber"], json!("HF12345"));
        assert_eq!(body[0]["info"]["manufacturer"], json!("Harvia"));
    }

    #[tokio::test]
    async fn test_device_state() {
        let server = Server::new_async().await;
        let (port, _refresh_rx) = setup_test_server(test_snapshot(), test_client(&server)).await;

        let response = reqwest::get(format!("http://127.0.0.1:{port}/v1/devices/sauna-1/state"))
            .await
            .unwrap();

        assert_eq!(response.status(), 200);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["connected"], json!(true));
        assert_eq!(body["targetTemp"], json!(80.0));

        // unknown devices are a 404 with a JSON error body
        let response = reqwest::get(format!("http://127.0.0.1:{port}/v1/devices/nope/state"))
            .await
            .unwrap();
        assert_eq!(response.status(), 404);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["error"], json!("unknown device"));
    }

    #[tokio::test]
    async fn test_device_state_before_first_poll() {
        let server = Server::new_async().await;
        let mut snapshot = test_snapshot();
        snapshot.states.clear();
        let (port, _refresh_rx) = setup_test_server(snapshot, test_client(&server)).await;

        let response = reqwest::get(format!("http://127.0.0.1:{port}/v1/devices/sauna-1/state"))
            .await
            .unwrap();

        assert_eq!(response.status(), 503);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["error"], json!("device state not polled yet"));
    }

    #[tokio::test]
    async fn test_device_telemetry() {
        let server = Server::new_async().await;
        let (port, _refresh_rx) = setup_test_server(test_snapshot(), test_client(&server)).await;

        let response = reqwest::get(format!(
            "http://127.0.0.1:{port}/v1/devices/sauna-1/telemetry"
        ))
        .await
        .unwrap();
        assert_eq!(response.status(), 200);

        let response = reqwest::get(format!("http://127.0.0.1:{port}/v1/devices/nope/telemetry"))
            .await
            .unwrap();
        assert_eq!(response.status(), 404);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["error"], json!("unknown device"));
    }

    #[tokio::test]
    async fn test_status() {
        let server = Server::new_async().await;
        let mut snapshot = test_snapshot();
        snapshot.stats.state_poll.record_success();
        snapshot.stats.telemetry_poll.record_error("timed out");
        let (port, _refresh_rx) = setup_test_server(snapshot, test_client(&server)).await;

        let response = reqwest::get(format!("http://127.0.0.1:{port}/v1/status"))
            .await
            .unwrap();

        assert_eq!(response.status(), 200);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["devices"], json!(1));
        assert_eq!(body["stats"]["statePoll"]["successCount"], json!(1));
        assert_eq!(body["stats"]["telemetryPoll"]["lastError"], json!("timed out"));
        assert_eq!(body["cloud"]["successCount"], json!(0));
    }

    #[tokio::test]
    async fn test_trigger_poll() {
        let server = Server::new_async().await;
        let (port, mut refresh_rx) = setup_test_server(test_snapshot(), test_client(&server)).await;
        let client = reqwest::Client::new();

        let response = client
            .post(format!("http://127.0.0.1:{port}/v1/poll"))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), 202);
        assert!(refresh_rx.changed().await.is_ok());
    }

    #[tokio::test]
    async fn test_set_power() {
        let mut server = Server::new_async().await;

        let login = server
            .mock("POST", "/auth/token")
            .with_header("content-type", "application/json")
            .with_body(json!({"idToken": "id-1", "expiresIn": 3600}).to_string())
            .create_async()
            .await;

        let command = server
            .mock("POST", "/devices/command")
            .match_body(Matcher::Json(json!({
                "deviceId": "sauna-1",
                "command": {"type": "SAUNA", "state": "on"},
            })))
            .create_async()
            .await;

        let (port, mut refresh_rx) = setup_test_server(test_snapshot(), test_client(&server)).await;
        let client = reqwest::Client::new();

        let response = client
            .post(format!("http://127.0.0.1:{port}/v1/devices/sauna-1/power"))
            .json(&json!({"on": true}))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), 202);
        login.assert_async().await;
        command.assert_async().await;

        // the command triggers an immediate poll round
        assert!(refresh_rx.changed().await.is_ok());

        // unknown devices are rejected before talking to the cloud
        let response = client
            .post(format!("http://127.0.0.1:{port}/v1/devices/nope/power"))
            .json(&json!({"on": false}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 404);
    }

    #[tokio::test]
    async fn test_set_power_cloud_error() {
        let mut server = Server::new_async().await;

        let _login = server
            .mock("POST", "/auth/token")
            .with_header("content-type", "application/json")
            .with_body(json!({"idToken": "id-1", "expiresIn": 3600}).to_string())
            .create_async()
            .await;

        let command = server
            .mock("POST", "/devices/command")
            .with_status(500)
            .with_body("command failed")
            .create_async()
            .await;

        let (port, _refresh_rx) = setup_test_server(test_snapshot(), test_client(&server)).await;
        let client = reqwest::Client::new();

        let response = client
            .post(format!("http://127.0.0.1:{port}/v1/devices/sauna-1/power"))
            .json(&json!({"on": true}))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), 502);
        command.assert_async().await;

        let body: serde_json::Value = response.json().await.unwrap();
        assert!(body["error"].as_str().unwrap().contains("command failed"));
    }

    #[tokio::test]
    async fn test_set_profile() {
        let mut server = Server::new_async().await;

        let _login = server
            .mock("POST", "/auth/token")
            .with_header("content-type", "application/json")
            .with_body(json!({"idToken": "id-1", "expiresIn": 3600}).to_string())
            .create_async()
            .await;

        let update = server
            .mock("POST", "/devices/state")
            .match_body(Matcher::Json(json!({
                "deviceId": "sauna-1",
                "state": {"activeProfile": 1},
            })))
            .create_async()
            .await;

        let (port, _refresh_rx) = setup_test_server(test_snapshot(), test_client(&server)).await;
        let client = reqwest::Client::new();

        let response = client
            .post(format!("http://127.0.0.1:{port}/v1/devices/sauna-1/profile"))
            .json(&json!({"profile": 1}))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), 202);
        update.assert_async().await;

        // the snapshot only knows profiles 0 and 1
        let response = client
            .post(format!("http://127.0.0.1:{port}/v1/devices/sauna-1/profile"))
            .json(&json!({"profile": 3}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 400);
    }
}

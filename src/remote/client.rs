use std::sync::atomic::{AtomicU64, Ordering};

use reqwest::header::ACCEPT;
use reqwest::{Method, StatusCode};
use serde::Serialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::models::{Device, SaunaState, TelemetryEnvelope};

use super::endpoints::{Endpoints, EndpointsError};
use super::session::{default_cache_path, AuthError, Session};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Endpoints(#[from] EndpointsError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("cloud request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("cloud request failed with status {0}: {1}")]
    Status(StatusCode, String),

    #[error("unexpected cloud response: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Metrics tracking the success and failure counts for cloud requests.
#[derive(Clone, Copy, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientMetrics {
    /// Number of requests that completed with a 2xx status.
    pub success_count: u64,
    /// Number of requests that failed (4xx, 5xx status codes, network errors).
    pub error_count: u64,
}

impl ClientMetrics {
    pub fn total_requests(&self) -> u64 {
        self.success_count + self.error_count
    }

    /// Returns the success rate as a percentage (0.0 to 100.0).
    ///
    /// Returns 0.0 if no requests have been made yet.
    pub fn success_rate(&self) -> f64 {
        let total = self.total_requests();
        if total == 0 {
            0.0
        } else {
            (self.success_count as f64 / total as f64) * 100.0
        }
    }
}

/// Client for the Harvia device API.
///
/// Wraps an authenticated [`Session`] and retries a request once with a
/// renewed token when the device API rejects the current one.
pub struct HarviaClient {
    http: reqwest::Client,
    endpoints: Endpoints,
    session: Session,
    success_count: AtomicU64,
    error_count: AtomicU64,
}

impl HarviaClient {
    /// Build a client from already discovered endpoints and an existing
    /// session. Most callers want [`HarviaClient::connect`] instead.
    pub fn new(http: reqwest::Client, endpoints: Endpoints, session: Session) -> Self {
        Self {
            http,
            endpoints,
            session,
            success_count: AtomicU64::new(0),
            error_count: AtomicU64::new(0),
        }
    }

    /// Discover endpoints, restore any cached tokens and make sure we
    /// hold a valid session before returning.
    pub async fn connect(config: &Config) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        let endpoints = Endpoints::fetch(&http, &config.endpoints_url).await?;

        let mut session = Session::new(
            http.clone(),
            endpoints.generics_base.clone(),
            config.credentials.clone(),
        );
        let cache_path = default_cache_path(&config.endpoints_url, &config.credentials.username);
        if let Some(path) = cache_path {
            session = session.with_cache(path);
        }
        session.restore().await;
        session.bearer().await?;

        Ok(Self::new(http, endpoints, session))
    }

    /// All sauna controllers registered to the account.
    pub async fn devices(&self) -> Result<Vec<Device>, ClientError> {
        let payload = self
            .request(Method::GET, self.device_url("devices"), &[], None)
            .await?;

        let listed = payload.as_array().is_some()
            || payload.get("devices").and_then(Value::as_array).is_some();
        if !listed {
            warn!("unexpected devices listing shape");
        }

        Ok(Device::from_listing(&payload))
    }

    /// Current reported state of a device, normalized.
    pub async fn device_state(&self, device_id: &str) -> Result<SaunaState, ClientError> {
        let payload = self
            .request(
                Method::GET,
                self.device_url("devices/state"),
                &[("deviceId", device_id)],
                None,
            )
            .await?;
        Ok(SaunaState::from_document(&payload))
    }

    /// Latest measurement report of a device.
    pub async fn latest_data(&self, device_id: &str) -> Result<TelemetryEnvelope, ClientError> {
        let payload = self
            .request(
                Method::GET,
                self.device_url("data/latest-data"),
                &[("deviceId", device_id)],
                None,
            )
            .await?;
        Ok(TelemetryEnvelope::from_document(&payload))
    }

    /// Switch the sauna on or off.
    pub async fn set_power(&self, device_id: &str, on: bool) -> Result<(), ClientError> {
        let state = if on { "on" } else { "off" };
        info!(device_id, state, "switching sauna power");

        let body = json!({
            "deviceId": device_id,
            "command": {"type": "SAUNA", "state": state},
        });
        self.request(Method::POST, self.device_url("devices/command"), &[], Some(&body))
            .await?;
        Ok(())
    }

    /// Make the given profile slot the active one.
    pub async fn set_active_profile(
        &self,
        device_id: &str,
        profile: u32,
    ) -> Result<(), ClientError> {
        info!(device_id, profile, "selecting profile");

        let body = json!({
            "deviceId": device_id,
            "state": {"activeProfile": profile},
        });
        self.request(Method::POST, self.device_url("devices/state"), &[], Some(&body))
            .await?;
        Ok(())
    }

    pub fn metrics(&self) -> ClientMetrics {
        ClientMetrics {
            success_count: self.success_count.load(Ordering::Relaxed),
            error_count: self.error_count.load(Ordering::Relaxed),
        }
    }

    fn device_url(&self, path: &str) -> String {
        format!("{}/{}", self.endpoints.device_base, path.trim_start_matches('/'))
    }

    async fn request(
        &self,
        method: Method,
        url: String,
        query: &[(&str, &str)],
        body: Option<&Value>,
    ) -> Result<Value, ClientError> {
        let result = self.try_request(method, &url, query, body).await;
        match &result {
            Ok(_) => self.success_count.fetch_add(1, Ordering::Relaxed),
            Err(_) => self.error_count.fetch_add(1, Ordering::Relaxed),
        };
        result
    }

    async fn try_request(
        &self,
        method: Method,
        url: &str,
        query: &[(&str, &str)],
        body: Option<&Value>,
    ) -> Result<Value, ClientError> {
        let mut renewed = false;
        loop {
            let token = if renewed {
                self.session.force_refresh().await?
            } else {
                self.session.bearer().await?
            };

            let mut request = self
                .http
                .request(method.clone(), url)
                .header(ACCEPT, "application/json")
                .bearer_auth(&token);
            if !query.is_empty() {
                request = request.query(query);
            }
            if let Some(body) = body {
                request = request.json(body);
            }

            let response = request.send().await?;
            let status = response.status();

            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                let text = response.text().await.unwrap_or_default();
                if renewed {
                    return Err(AuthError::Rejected(status, text).into());
                }
                // token may have been revoked server side, renew and retry
                debug!(%status, url, "request rejected, renewing token");
                renewed = true;
                continue;
            }

            if status.is_client_error() || status.is_server_error() {
                let text = response.text().await.unwrap_or_default();
                return Err(ClientError::Status(status, text));
            }

            let text = response.text().await?;
            if text.trim().is_empty() {
                return Ok(json!({}));
            }
            return Ok(serde_json::from_str(&text)?);
        }
    }
}

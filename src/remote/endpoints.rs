use reqwest::header::ACCEPT;
use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

/// Default discovery URL. The response tells us where the account's
/// generics and device APIs actually live.
pub const DEFAULT_DISCOVERY_URL: &str = "https://api.harvia.io/endpoints";

#[derive(Debug, Error)]
pub enum EndpointsError {
    #[error("endpoint discovery request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("endpoint discovery failed with status {0}: {1}")]
    Status(StatusCode, String),

    #[error("endpoint discovery response is missing `{0}`")]
    Missing(&'static str),
}

/// Base URLs of the two REST services behind the Harvia cloud.
///
/// Authentication goes through the generics API, device listing, state
/// and commands through the device API.
#[derive(Clone, Debug, PartialEq)]
pub struct Endpoints {
    pub generics_base: String,
    pub device_base: String,
}

impl Endpoints {
    /// Fetch service endpoints from the discovery URL.
    pub async fn fetch(http: &reqwest::Client, url: &str) -> Result<Self, EndpointsError> {
        let response = http
            .get(url)
            .header(ACCEPT, "application/json")
            .send()
            .await?;

        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(EndpointsError::Status(status, body));
        }

        let payload: Value = response.json().await?;
        let rest = payload
            .get("endpoints")
            .and_then(|e| e.get("RestApi"))
            .ok_or(EndpointsError::Missing("endpoints.RestApi"))?;

        let endpoints = Self {
            generics_base: https_url(rest.get("generics"), "endpoints.RestApi.generics.https")?,
            device_base: https_url(rest.get("device"), "endpoints.RestApi.device.https")?,
        };

        debug!(
            generics = %endpoints.generics_base,
            device = %endpoints.device_base,
            "discovered cloud endpoints"
        );

        Ok(endpoints)
    }
}

fn https_url(service: Option<&Value>, path: &'static str) -> Result<String, EndpointsError> {
    service
        .and_then(|s| s.get("https"))
        .and_then(Value::as_str)
        .map(|url| url.trim_end_matches('/').to_string())
        .filter(|url| !url.is_empty())
        .ok_or(EndpointsError::Missing(path))
}

use std::fmt;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use reqwest::header::ACCEPT;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::models::coerce_f64;
use crate::util::crypto::sha256_hex_digest;
use crate::util::fs::safe_write_all;

/// Tokens are renewed this much before their reported expiry to absorb
/// clock skew between us and the cloud.
const EXPIRY_SKEW: Duration = Duration::from_secs(60);

/// Account credentials for the Harvia cloud.
#[derive(Clone, PartialEq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"********")
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("the cloud rejected the credentials with status {0}: {1}")]
    Rejected(StatusCode, String),

    #[error("authentication request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("authentication failed with status {0}: {1}")]
    Status(StatusCode, String),

    #[error("unexpected token payload: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("the token response did not include an id token")]
    MissingToken,
}

/// Token payload of `/auth/token` and `/auth/refresh` responses. The
/// cloud has been seen using both camelCase and snake_case key spellings
/// and reporting `expiresIn` as a number or a string.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenPayload {
    #[serde(default, alias = "id_token")]
    id_token: Option<String>,
    #[serde(default, alias = "access_token")]
    access_token: Option<String>,
    #[serde(default, alias = "refresh_token")]
    refresh_token: Option<String>,
    #[serde(default, alias = "expires_in")]
    expires_in: Option<Value>,
}

#[derive(Debug, Default)]
struct TokenState {
    id_token: Option<String>,
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_at_ms: Option<u64>,
}

impl TokenState {
    /// Fold a response payload into the stored tokens. Empty or missing
    /// values keep what is already there, except that a login response
    /// missing a refresh token clears it.
    fn store(&mut self, payload: TokenPayload, keep_refresh_if_missing: bool) {
        let nonempty = |token: Option<String>| token.filter(|t| !t.is_empty());

        if let Some(token) = nonempty(payload.id_token) {
            self.id_token = Some(token);
        }
        if let Some(token) = nonempty(payload.access_token) {
            self.access_token = Some(token);
        }
        match nonempty(payload.refresh_token) {
            Some(token) => self.refresh_token = Some(token),
            None if keep_refresh_if_missing => {}
            None => self.refresh_token = None,
        }
        if let Some(expires_in) = &payload.expires_in {
            self.expires_at_ms =
                coerce_f64(expires_in).map(|secs| now_ms() + (secs * 1000.0) as u64);
        }
    }

    fn is_stale(&self, now_ms: u64) -> bool {
        if self.id_token.is_none() {
            return true;
        }
        match self.expires_at_ms {
            Some(expires_at_ms) => now_ms + EXPIRY_SKEW.as_millis() as u64 >= expires_at_ms,
            None => false,
        }
    }
}

/// On-disk shape of the token cache.
#[derive(Debug, Serialize, Deserialize)]
struct CachedTokens {
    id_token: Option<String>,
    access_token: Option<String>,
    refresh_token: Option<String>,
    expires_at_ms: Option<u64>,
}

/// An authenticated session against the generics API.
///
/// Tokens are renewed lazily when a bearer token is requested. All
/// renewals go through a mutex so concurrent callers never race the
/// login endpoint.
pub struct Session {
    http: reqwest::Client,
    generics_base: String,
    credentials: Credentials,
    state: Mutex<TokenState>,
    cache_path: Option<PathBuf>,
}

impl Session {
    pub fn new(
        http: reqwest::Client,
        generics_base: impl Into<String>,
        credentials: Credentials,
    ) -> Self {
        Self {
            http,
            generics_base: generics_base.into(),
            credentials,
            state: Mutex::new(TokenState::default()),
            cache_path: None,
        }
    }

    /// Persist tokens at the given path so restarts can skip the login
    /// round trip.
    pub fn with_cache(mut self, path: PathBuf) -> Self {
        self.cache_path = Some(path);
        self
    }

    /// A valid bearer token, renewing first when the current one is
    /// missing or about to expire.
    pub async fn bearer(&self) -> Result<String, AuthError> {
        self.ensure_token(false).await
    }

    /// Renew the token even if it has not expired yet. Used after the
    /// device API rejects a request the token should have covered.
    pub async fn force_refresh(&self) -> Result<String, AuthError> {
        self.ensure_token(true).await
    }

    async fn ensure_token(&self, force: bool) -> Result<String, AuthError> {
        let mut state = self.state.lock().await;

        if !force && !state.is_stale(now_ms()) {
            if let Some(token) = &state.id_token {
                return Ok(token.clone());
            }
        }

        match state.refresh_token.clone() {
            Some(refresh_token) => {
                if let Err(err) = self.refresh(&mut state, &refresh_token).await {
                    warn!("token refresh failed, logging in again: {err}");
                    self.authenticate(&mut state).await?;
                }
            }
            None => self.authenticate(&mut state).await?,
        }

        let token = state.id_token.clone().ok_or(AuthError::MissingToken)?;
        self.persist(&state).await;
        Ok(token)
    }

    async fn authenticate(&self, state: &mut TokenState) -> Result<(), AuthError> {
        let url = format!("{}/auth/token", self.generics_base);
        debug!(%url, "logging in to the cloud");
        let response = self
            .http
            .post(url)
            .header(ACCEPT, "application/json")
            .json(&json!({
                "username": self.credentials.username,
                "password": self.credentials.password,
            }))
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Rejected(status, body));
        }
        if status.is_client_error() || status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Status(status, body));
        }

        state.store(parse_tokens(response).await?, false);
        if state.id_token.is_none() {
            return Err(AuthError::MissingToken);
        }

        debug!(refresh_token = state.refresh_token.is_some(), "logged in");
        Ok(())
    }

    async fn refresh(&self, state: &mut TokenState, refresh_token: &str) -> Result<(), AuthError> {
        let response = self
            .http
            .post(format!("{}/auth/refresh", self.generics_base))
            .header(ACCEPT, "application/json")
            .json(&json!({
                "refreshToken": refresh_token,
                "email": self.credentials.username,
                "username": self.credentials.username,
            }))
            .send()
            .await?;

        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::Status(status, body));
        }

        state.store(parse_tokens(response).await?, true);
        if state.id_token.is_none() {
            return Err(AuthError::MissingToken);
        }

        debug!("refreshed session tokens");
        Ok(())
    }

    /// Load previously persisted tokens. Unreadable or corrupt caches
    /// are ignored, the next `bearer` call just logs in again.
    pub async fn restore(&self) {
        let Some(path) = &self.cache_path else {
            return;
        };

        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(_) => return,
        };

        match serde_json::from_slice::<CachedTokens>(&bytes) {
            Ok(cached) => {
                let mut state = self.state.lock().await;
                state.id_token = cached.id_token;
                state.access_token = cached.access_token;
                state.refresh_token = cached.refresh_token;
                state.expires_at_ms = cached.expires_at_ms;
                debug!(path = %path.display(), "restored cached session tokens");
            }
            Err(err) => {
                warn!(path = %path.display(), "ignoring unreadable token cache: {err}");
            }
        }
    }

    async fn persist(&self, state: &TokenState) {
        let Some(path) = &self.cache_path else {
            return;
        };

        if let Some(parent) = path.parent() {
            if let Err(err) = tokio::fs::create_dir_all(parent).await {
                warn!(path = %path.display(), "failed to create token cache directory: {err}");
                return;
            }
        }

        let cached = CachedTokens {
            id_token: state.id_token.clone(),
            access_token: state.access_token.clone(),
            refresh_token: state.refresh_token.clone(),
            expires_at_ms: state.expires_at_ms,
        };

        match serde_json::to_vec(&cached) {
            Ok(bytes) => {
                if let Err(err) = safe_write_all(path, bytes) {
                    warn!(path = %path.display(), "failed to write token cache: {err}");
                }
            }
            Err(err) => warn!("failed to encode token cache: {err}"),
        }
    }
}

/// Cache location for a given discovery URL and account, under the OS
/// cache directory with a home directory fallback.
pub fn default_cache_path(discovery_url: &str, username: &str) -> Option<PathBuf> {
    let cache_dir = dirs::cache_dir().or_else(|| dirs::home_dir().map(|home| home.join(".cache")))?;
    let filename = format!("{}.json", sha256_hex_digest(format!("{discovery_url}|{username}")));
    Some(cache_dir.join(env!("CARGO_PKG_NAME")).join(filename))
}

async fn parse_tokens(response: reqwest::Response) -> Result<TokenPayload, AuthError> {
    let body = response.text().await?;
    if body.trim().is_empty() {
        return Ok(TokenPayload::default());
    }
    Ok(serde_json::from_str(&body)?)
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("generics_base", &self.generics_base)
            .field("credentials", &self.credentials)
            .field("cache_path", &self.cache_path)
            .finish()
    }
}

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::remote::{Credentials, DEFAULT_DISCOVERY_URL};

pub const DEFAULT_LOCAL_API_PORT: u16 = 4278;

/// Complete agent configuration, assembled in `cli` from arguments,
/// environment variables and defaults.
#[derive(Clone, Debug)]
pub struct Config {
    pub credentials: Credentials,

    /// Endpoint discovery URL.
    pub endpoints_url: String,

    /// Timeout applied to every cloud request.
    pub request_timeout: Duration,

    pub poll: PollConfig,

    /// Listen address of the local HTTP API.
    pub local_api_address: SocketAddr,
}

impl Config {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            endpoints_url: DEFAULT_DISCOVERY_URL.to_string(),
            request_timeout: Duration::from_secs(30),
            poll: PollConfig::default(),
            local_api_address: SocketAddr::from((Ipv4Addr::LOCALHOST, DEFAULT_LOCAL_API_PORT)),
        }
    }
}

/// Cadence settings for the polling loops.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PollConfig {
    /// Interval between state poll rounds.
    pub state_interval: Duration,

    /// Interval between telemetry poll rounds. Measurements change more
    /// often than panel configuration so this defaults to a faster cadence.
    pub telemetry_interval: Duration,

    /// Starting point for error backoff.
    pub min_interval: Duration,

    /// Ceiling for error backoff.
    pub max_backoff: Duration,

    /// Maximum random delay added to every poll round.
    pub max_jitter: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            state_interval: Duration::from_secs(120),
            telemetry_interval: Duration::from_secs(30),
            min_interval: Duration::from_secs(5),
            max_backoff: Duration::from_secs(300),
            max_jitter: Duration::from_secs(2),
        }
    }
}

use clap::{Parser, Subcommand, ValueEnum};
use std::net::SocketAddr;
use std::num::ParseIntError;
use std::time::Duration;

use crate::config::{Config, PollConfig};
use crate::remote::Credentials;

fn parse_duration(s: &str) -> Result<Duration, ParseIntError> {
    let millis: u64 = s.parse()?;
    Ok(Duration::from_millis(millis))
}

#[derive(Clone, Debug, Parser)]
#[command(version, about, long_about = None)] // read from Cargo.toml
pub struct Cli {
    /// Harvia account email
    #[arg(env = "HARVIA_USERNAME", long = "username", value_name = "email")]
    pub username: String,

    /// Harvia account password
    #[arg(
        env = "HARVIA_PASSWORD",
        long = "password",
        value_name = "password",
        hide_env_values = true
    )]
    pub password: String,

    /// Endpoint discovery URL
    #[arg(env = "HARVIA_ENDPOINTS_URL", long = "endpoints-url", value_name = "url")]
    pub endpoints_url: Option<String>,

    /// Cloud request timeout in milliseconds
    #[arg(
        env = "HARVIA_REQUEST_TIMEOUT_MS",
        long = "request-timeout-ms",
        value_name = "ms",
        value_parser = parse_duration
    )]
    pub request_timeout: Option<Duration>,

    /// Device state poll interval in milliseconds
    #[arg(
        env = "HARVIA_STATE_POLL_INTERVAL_MS",
        long = "state-poll-interval-ms",
        value_name = "ms",
        value_parser = parse_duration
    )]
    pub state_poll_interval: Option<Duration>,

    /// Telemetry poll interval in milliseconds
    #[arg(
        env = "HARVIA_TELEMETRY_POLL_INTERVAL_MS",
        long = "telemetry-poll-interval-ms",
        value_name = "ms",
        value_parser = parse_duration
    )]
    pub telemetry_poll_interval: Option<Duration>,

    /// Floor for poll error backoff in milliseconds
    #[arg(
        env = "HARVIA_POLL_MIN_INTERVAL_MS",
        long = "poll-min-interval-ms",
        value_name = "ms",
        value_parser = parse_duration
    )]
    pub poll_min_interval: Option<Duration>,

    /// Ceiling for poll error backoff in milliseconds
    #[arg(
        env = "HARVIA_POLL_MAX_BACKOFF_MS",
        long = "poll-max-backoff-ms",
        value_name = "ms",
        value_parser = parse_duration
    )]
    pub poll_max_backoff: Option<Duration>,

    /// Poll max jitter in milliseconds
    #[arg(
        env = "HARVIA_POLL_MAX_JITTER_MS",
        long = "poll-max-jitter-ms",
        value_name = "ms",
        value_parser = parse_duration
    )]
    pub poll_max_jitter: Option<Duration>,

    /// Local API listen address
    #[arg(
        env = "HARVIA_LOCAL_API_ADDRESS",
        long = "local-api-address",
        value_name = "addr"
    )]
    pub local_api_address: Option<SocketAddr>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Clone, Debug, Subcommand)]
pub enum Command {
    /// Run the polling agent with the local API (the default)
    Run,

    /// List the account's devices and exit
    Devices,

    /// Print a device's reported state and exit
    State {
        /// Device identifier, see `devices`
        device_id: String,
    },

    /// Print a device's latest measurements and exit
    Data {
        /// Device identifier, see `devices`
        device_id: String,
    },

    /// Switch the sauna on or off
    Power {
        /// Device identifier, see `devices`
        device_id: String,

        /// Power state to set
        #[arg(value_enum)]
        state: PowerState,
    },

    /// Select the active profile slot
    Profile {
        /// Device identifier, see `devices`
        device_id: String,

        /// Profile slot index
        index: u32,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, ValueEnum)]
pub enum PowerState {
    On,
    Off,
}

impl PowerState {
    pub fn is_on(self) -> bool {
        matches!(self, PowerState::On)
    }
}

impl Cli {
    /// Merge arguments with defaults into the full agent configuration.
    pub fn config(&self) -> Config {
        let poll_defaults = PollConfig::default();
        let mut config = Config::new(Credentials::new(&self.username, &self.password));

        if let Some(url) = &self.endpoints_url {
            config.endpoints_url = url.clone();
        }
        if let Some(timeout) = self.request_timeout {
            config.request_timeout = timeout;
        }
        if let Some(address) = self.local_api_address {
            config.local_api_address = address;
        }
        config.poll = PollConfig {
            state_interval: self.state_poll_interval.unwrap_or(poll_defaults.state_interval),
            telemetry_interval: self
                .telemetry_poll_interval
                .unwrap_or(poll_defaults.telemetry_interval),
            min_interval: self.poll_min_interval.unwrap_or(poll_defaults.min_interval),
            max_backoff: self.poll_max_backoff.unwrap_or(poll_defaults.max_backoff),
            max_jitter: self.poll_max_jitter.unwrap_or(poll_defaults.max_jitter),
        };

        config
    }
}

pub fn parse() -> Cli {
    Parser::parse()
}

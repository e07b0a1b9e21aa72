mod api;
mod cli;
mod cmd;
mod config;
mod models;
mod poll;
mod remote;
mod snapshot;
mod util;

use anyhow::Result;
use tracing::debug;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::cli::Command;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber for human-readable logs
    tracing_subscriber::registry()
        .with(
            // Use some log defaults. These can be overriden using RUST_LOG
            EnvFilter::try_from_default_env().unwrap_or(
                EnvFilter::default()
                    .add_directive("info".parse()?)
                    .add_directive("hyper=error".parse()?)
                    .add_directive("reqwest=warn".parse()?),
            ),
        )
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_span_events(FmtSpan::CLOSE)
                .event_format(fmt::format().compact().with_target(false).without_time()),
        )
        .init();

    let cli = cli::parse();
    let config = cli.config();
    debug!("{config:#?}");

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => cmd::run(config).await,
        Command::Devices => cmd::devices(config).await,
        Command::State { device_id } => cmd::state(config, &device_id).await,
        Command::Data { device_id } => cmd::data(config, &device_id).await,
        Command::Power { device_id, state } => cmd::power(config, &device_id, state.is_on()).await,
        Command::Profile { device_id, index } => cmd::profile(config, &device_id, index).await,
    }
}

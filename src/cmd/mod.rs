/*
Subcommand implementations. `run` is the long-running agent, everything
else is a one-shot command that talks to the cloud and exits.
*/

mod control;
mod run;
mod show;

pub use control::{power, profile};
pub use run::run;
pub use show::{data, devices, state};

use anyhow::{bail, Result};

use crate::config::Config;
use crate::remote::{AuthError, ClientError, HarviaClient};

/// Connect to the cloud, turning a credential rejection into a message
/// the user can act on.
async fn connect(config: &Config) -> Result<HarviaClient> {
    match HarviaClient::connect(config).await {
        Ok(client) => Ok(client),
        Err(ClientError::Auth(AuthError::Rejected(status, _))) => {
            bail!("the cloud rejected these credentials (status {status})")
        }
        Err(err) => Err(err.into()),
    }
}

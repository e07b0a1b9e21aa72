/*
This module is home to everything related to the Harvia cloud backend.

It discovers the per-account API endpoints, keeps an authenticated
session against the generics API, and wraps the device API operations
the agent needs, refreshing tokens and retrying rejected calls as it
goes.
*/

mod client;
mod endpoints;
mod session;

pub use client::{ClientError, ClientMetrics, HarviaClient};
pub use endpoints::{DEFAULT_DISCOVERY_URL, Endpoints, EndpointsError};
pub use session::{AuthError, Credentials, Session};

/*
This module is home to everything related to the cloud hub the device
reports to.

It provides the retry policy and connection establishment, the hub client
(MQTT over TLS), and the session that keeps the device subscribed to
commands and property updates while periodically publishing telemetry
and reported properties.
*/

mod backoff;
mod config;
mod connect;
mod handler;
mod hub;
mod mqtt;
mod session;
mod topic;
mod transport;

pub use backoff::{Backoff, RetryState};
pub use config::{RetryConfig, SessionConfig};
pub use connect::{ConnectError, connect_with_backoff};
pub use handler::DeviceHandler;
pub use hub::{HubClient, HubError, MessageHandler};
pub use mqtt::MqttHub;
pub use session::{Connectivity, Session, SessionError, SessionExit, SessionState};
pub use transport::{Credentials, Endpoint, Timeouts, Transport, TransportError};

use pnplink_twin as twin;
use pnplink_util as util;

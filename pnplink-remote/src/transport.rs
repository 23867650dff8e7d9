use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::util::types::HostName;

/// Network address of the hub
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoint {
    pub host: HostName,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<HostName>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// TLS material used to authenticate against the hub
#[derive(Clone)]
pub struct Credentials {
    /// PEM encoded root CA the hub certificate must chain to
    pub root_ca: Vec<u8>,

    /// PEM encoded device certificate and its private key
    pub client_cert: Option<Vec<u8>>,
    pub private_key: Option<Vec<u8>>,

    /// Application protocols offered during the handshake
    pub alpn: Vec<String>,

    pub disable_sni: bool,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("root_ca", &format_args!("{} bytes", self.root_ca.len()))
            .field("client_cert", &self.client_cert.as_ref().map(Vec::len))
            .field("private_key", &self.private_key.as_ref().map(|_| "<redacted>"))
            .field("alpn", &self.alpn)
            .field("disable_sni", &self.disable_sni)
            .finish()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Timeouts {
    /// How long to wait for the hub to accept the connection
    pub connect: Duration,
    pub send: Duration,
    pub recv: Duration,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connection to {0} timed out")]
    Timeout(String),

    #[error("connection refused by the hub: {0}")]
    Refused(String),

    #[error("invalid credentials: {0}")]
    Credentials(String),

    #[error("network error: {0}")]
    Network(String),
}

/// A secure connection to the hub
///
/// Implementations own the connection handle, the TLS handshake and the
/// byte level send and receive with the given timeouts.
#[allow(async_fn_in_trait)]
pub trait Transport {
    async fn connect(
        &mut self,
        endpoint: &Endpoint,
        credentials: &Credentials,
        timeouts: &Timeouts,
    ) -> Result<(), TransportError>;

    /// Drop the connection, if any
    async fn close(&mut self);
}

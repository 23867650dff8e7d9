use tokio::net::lookup_host;
use tracing::debug;

use crate::remote::{Connectivity, Endpoint};

/// Considers the network up when the hub host name resolves
pub struct DnsConnectivity {
    endpoint: Endpoint,
}

impl DnsConnectivity {
    pub fn new(endpoint: Endpoint) -> Self {
        Self { endpoint }
    }
}

impl Connectivity for DnsConnectivity {
    async fn is_connected(&self) -> bool {
        match lookup_host((self.endpoint.host.as_str(), self.endpoint.port)).await {
            Ok(mut addrs) => addrs.next().is_some(),
            Err(e) => {
                debug!("cannot resolve {}: {e}", self.endpoint.host);
                false
            }
        }
    }
}

use rand::Rng;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{info, instrument, warn};

use crate::backoff::{Backoff, RetryState};
use crate::config::RetryConfig;
use crate::transport::{Credentials, Endpoint, Timeouts, Transport, TransportError};

#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("giving up on {endpoint} after {attempts} attempts: {last}")]
    Exhausted {
        endpoint: String,
        attempts: u32,
        #[source]
        last: TransportError,
    },
}

/// Connect the transport to the hub, retrying failed attempts with backoff
///
/// The transport is left connected on success. The delay between attempts
/// is the only point where this waits.
#[instrument(skip_all, fields(endpoint = %endpoint), err)]
pub async fn connect_with_backoff<T, R>(
    transport: &mut T,
    endpoint: &Endpoint,
    credentials: &Credentials,
    timeouts: &Timeouts,
    retry: &RetryConfig,
    rng: &mut R,
) -> Result<(), ConnectError>
where
    T: Transport,
    R: Rng + ?Sized,
{
    let mut state = RetryState::new(retry);
    loop {
        info!("connecting");
        let err = match transport.connect(endpoint, credentials, timeouts).await {
            Ok(()) => {
                info!("connected");
                return Ok(());
            }
            Err(err) => err,
        };

        match state.next_delay(rng) {
            Backoff::Retry(delay) => {
                warn!(
                    attempt = state.attempts(),
                    delay_ms = delay.as_millis() as u64,
                    "connection failed: {err}"
                );
                sleep(delay).await;
            }
            Backoff::Exhausted => {
                return Err(ConnectError::Exhausted {
                    endpoint: endpoint.to_string(),
                    attempts: state.attempts(),
                    last: err,
                });
            }
        }
    }
}

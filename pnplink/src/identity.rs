use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::cli::Cli;
use crate::util::store::{Store, StoreError};
use crate::util::types::{DeviceId, HostName};

// IMPORTANT: this struct is persisted to disk, failing to deserialize it
// leaves the device without an identity. Keep changes backwards compatible.

/// Device identity on the hub
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct DeviceConfig {
    pub host: HostName,
    pub device_id: DeviceId,
}

const DEVICE_CONFIG: &str = "device";

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("no device identity found, use --host and --device-id or create {0}")]
    Missing(String),
}

/// Find out who we are
///
/// A (host, device id) pair given on the command line takes precedence and
/// replaces the stored identity. Otherwise the stored identity is used, and
/// partial command line overrides are ignored.
pub async fn load(cli: &Cli, store: &Store) -> Result<DeviceConfig, IdentityError> {
    let stored: Option<DeviceConfig> = store.read(DEVICE_CONFIG).await?;

    if let (Some(host), Some(device_id)) = (&cli.host, &cli.device_id) {
        let device = DeviceConfig {
            host: host.clone(),
            device_id: device_id.clone(),
        };

        if stored.as_ref() != Some(&device) {
            if let Some(stored) = &stored {
                warn!(
                    "replacing stored identity {} at {}",
                    stored.device_id, stored.host
                );
            }
            debug!("storing device identity");
            store.write(DEVICE_CONFIG, &device).await?;
        }

        return Ok(device);
    }

    let Some(stored) = stored else {
        return Err(IdentityError::Missing(
            store.root().join(DEVICE_CONFIG).with_extension("json").display().to_string(),
        ));
    };

    if cli.host.as_ref().is_some_and(|host| host != &stored.host) {
        warn!("ignoring --host argument that is different to the stored identity");
    }
    if cli
        .device_id
        .as_ref()
        .is_some_and(|device_id| device_id != &stored.device_id)
    {
        warn!("ignoring --device-id argument that is different to the stored identity");
    }

    Ok(stored)
}

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::timeout;

use crate::codec::CodecError;
use crate::json::fixed;
use crate::report::bounded;
use crate::shadow::DeviceShadow;

/// Number of magnitude bins in a sensor spectrum
pub const FFT_BINS: usize = 128;

/// Default room for an encoded telemetry message
pub const TELEMETRY_CAPACITY: usize = 4098;

#[derive(Debug, Error)]
#[error("sensor snapshot is locked by another task")]
pub struct SnapshotBusy;

/// Latest sensor spectrum, shared between the sampler and the session
///
/// Access waits for the lock for a bounded time only, so a stuck producer
/// costs the session a telemetry message rather than a stalled loop.
#[derive(Debug, Clone, Default)]
pub struct SensorSnapshot {
    bins: Arc<Mutex<Vec<f32>>>,
}

impl SensorSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the stored spectrum
    pub async fn publish(&self, bins: Vec<f32>, wait: Duration) -> Result<(), SnapshotBusy> {
        let mut stored = timeout(wait, self.bins.lock())
            .await
            .map_err(|_| SnapshotBusy)?;
        *stored = bins;
        Ok(())
    }

    /// Copy of the stored spectrum, empty if nothing was published yet
    pub async fn read(&self, wait: Duration) -> Result<Vec<f32>, SnapshotBusy> {
        let stored = timeout(wait, self.bins.lock())
            .await
            .map_err(|_| SnapshotBusy)?;
        Ok(stored.clone())
    }
}

#[derive(Serialize)]
struct Spectrum<'a> {
    #[serde(rename = "FFT")]
    fft: &'a [f32],
}

/// Builds device to cloud telemetry messages
#[derive(Debug, Clone)]
pub struct Telemetry {
    capacity: usize,
}

impl Default for Telemetry {
    fn default() -> Self {
        Self {
            capacity: TELEMETRY_CAPACITY,
        }
    }
}

impl Telemetry {
    pub fn with_capacity(capacity: usize) -> Self {
        Self { capacity }
    }

    pub fn spectrum(&self, bins: &[f32]) -> Result<Vec<u8>, CodecError> {
        let encoded = serde_json::to_vec(&Spectrum { fft: bins }).map_err(CodecError::Encoding)?;
        bounded(encoded, self.capacity)
    }

    pub fn temperature(&self, shadow: &DeviceShadow) -> Result<Vec<u8>, CodecError> {
        let value = fixed(shadow.current(), 2).map_err(CodecError::Encoding)?;
        let encoded = serde_json::to_vec(&BTreeMap::from([("temperature", value)]))
            .map_err(CodecError::Encoding)?;
        bounded(encoded, self.capacity)
    }
}

use std::collections::BTreeMap;

use crate::codec::CodecError;
use crate::json::fixed;
use crate::shadow::DeviceShadow;

/// Default room for an encoded reported properties document
pub const REPORTED_CAPACITY: usize = 380;

const SAMPLING_FREQUENCY: &str = "samplingFrequency";
const MAX_TEMP_SINCE_REBOOT: &str = "maxTempSinceLastReboot";

/// Default sampling frequency reported by the device, in Hz
const DEFAULT_SAMPLING_FREQUENCY: f64 = 1000.0;

/// Builds the read-only properties the device reports on its own
#[derive(Debug, Clone)]
pub struct ReportedProperties {
    sampling_frequency: f64,
    capacity: usize,
}

impl Default for ReportedProperties {
    fn default() -> Self {
        Self {
            sampling_frequency: DEFAULT_SAMPLING_FREQUENCY,
            capacity: REPORTED_CAPACITY,
        }
    }
}

impl ReportedProperties {
    pub fn with_sampling_frequency(self, sampling_frequency: f64) -> Self {
        Self {
            sampling_frequency,
            ..self
        }
    }

    /// Periodic heartbeat document
    pub fn heartbeat(&self) -> Result<Vec<u8>, CodecError> {
        self.encode(SAMPLING_FREQUENCY, self.sampling_frequency)
    }

    /// Highest temperature seen since boot
    pub fn max_temperature(&self, shadow: &DeviceShadow) -> Result<Vec<u8>, CodecError> {
        self.encode(MAX_TEMP_SINCE_REBOOT, shadow.maximum())
    }

    fn encode(&self, name: &str, value: f64) -> Result<Vec<u8>, CodecError> {
        let value = fixed(value, 2).map_err(CodecError::Encoding)?;
        let encoded =
            serde_json::to_vec(&BTreeMap::from([(name, value)])).map_err(CodecError::Encoding)?;
        bounded(encoded, self.capacity)
    }
}

pub(crate) fn bounded(encoded: Vec<u8>, capacity: usize) -> Result<Vec<u8>, CodecError> {
    if encoded.len() > capacity {
        return Err(CodecError::BufferTooSmall {
            needed: encoded.len(),
            capacity,
        });
    }
    Ok(encoded)
}

use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::ops::Deref;
use std::str::FromStr;
use thiserror::Error;

/// Identity of the device as registered in the hub
///
/// The id becomes part of MQTT topic names so it cannot be empty nor
/// contain topic separators or wildcards.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceId(String);

#[derive(Debug, Error)]
#[error("invalid device id '{0}': must be non-empty and not contain '/', '+' or '#'")]
pub struct InvalidDeviceIdError(String);

impl Deref for DeviceId {
    type Target = String;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for DeviceId {
    type Err = InvalidDeviceIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_from(s.to_owned())
    }
}

impl TryFrom<String> for DeviceId {
    type Error = InvalidDeviceIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        if value.is_empty() || value.contains(['/', '+', '#']) {
            return Err(InvalidDeviceIdError(value));
        }
        Ok(Self(value))
    }
}

impl From<DeviceId> for String {
    fn from(value: DeviceId) -> Self {
        value.0
    }
}

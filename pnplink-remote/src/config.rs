use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::time::Duration;

use crate::util::json::{deserialize_duration_from_ms, serialize_duration_to_ms};

/// Bounds of the retry policy used while connecting to the hub
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    #[serde(
        rename = "retry_base_ms",
        deserialize_with = "deserialize_duration_from_ms",
        serialize_with = "serialize_duration_to_ms"
    )]
    pub base: Duration,

    #[serde(
        rename = "retry_max_ms",
        deserialize_with = "deserialize_duration_from_ms",
        serialize_with = "serialize_duration_to_ms"
    )]
    pub max: Duration,

    /// Connection attempts per sequence, zero is rejected on load
    #[serde(rename = "retry_max_attempts")]
    pub max_attempts: NonZeroU32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(500),
            max: Duration::from_millis(5000),
            max_attempts: NonZeroU32::MIN.saturating_add(4),
        }
    }
}

/// Session timing configuration
///
/// Stored as a JSON document with every duration in milliseconds, missing
/// fields take their default.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    #[serde(flatten)]
    pub retry: RetryConfig,

    #[serde(
        rename = "connack_timeout_ms",
        deserialize_with = "deserialize_duration_from_ms",
        serialize_with = "serialize_duration_to_ms"
    )]
    pub connack_timeout: Duration,

    #[serde(
        rename = "subscribe_timeout_ms",
        deserialize_with = "deserialize_duration_from_ms",
        serialize_with = "serialize_duration_to_ms"
    )]
    pub subscribe_timeout: Duration,

    #[serde(
        rename = "publish_interval_ms",
        deserialize_with = "deserialize_duration_from_ms",
        serialize_with = "serialize_duration_to_ms"
    )]
    pub publish_interval: Duration,

    #[serde(
        rename = "process_loop_timeout_ms",
        deserialize_with = "deserialize_duration_from_ms",
        serialize_with = "serialize_duration_to_ms"
    )]
    pub process_loop_timeout: Duration,

    /// Send and receive timeout of the transport
    #[serde(
        rename = "transport_timeout_ms",
        deserialize_with = "deserialize_duration_from_ms",
        serialize_with = "serialize_duration_to_ms"
    )]
    pub transport_timeout: Duration,

    /// Idle delay between connection cycles
    #[serde(
        rename = "cycle_delay_ms",
        deserialize_with = "deserialize_duration_from_ms",
        serialize_with = "serialize_duration_to_ms"
    )]
    pub cycle_delay: Duration,

    /// Steady state iterations before the connection is recycled
    pub polls_per_cycle: u32,

    pub keep_alive_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            connack_timeout: Duration::from_millis(10_000),
            subscribe_timeout: Duration::from_millis(10_000),
            publish_interval: Duration::from_millis(2000),
            process_loop_timeout: Duration::from_millis(500),
            transport_timeout: Duration::from_millis(2000),
            cycle_delay: Duration::from_millis(5000),
            polls_per_cycle: 30,
            keep_alive_secs: 60,
        }
    }
}

impl SessionConfig {
    pub fn keep_alive(&self) -> Duration {
        Duration::from_secs(self.keep_alive_secs)
    }
}

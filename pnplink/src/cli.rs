use clap::Parser;
use std::num::{NonZeroU32, ParseIntError};
use std::path::PathBuf;
use std::time::Duration;

use crate::remote::SessionConfig;
use crate::util::types::{DeviceId, HostName, ModelId};

fn parse_duration(s: &str) -> Result<Duration, ParseIntError> {
    let millis: u64 = s.parse()?;
    Ok(Duration::from_millis(millis))
}

#[derive(Clone, Debug, Parser)]
#[command(version, about, long_about = None)] // read from Cargo.toml
pub struct Cli {
    /// Directory holding the device document and TLS material
    #[arg(env = "PNPLINK_STORAGE_DIR", long = "storage-dir", value_name = "path")]
    pub storage_dir: Option<PathBuf>,

    /// IoT hub host name
    #[arg(env = "PNPLINK_HOST", long = "host", value_name = "host")]
    pub host: Option<HostName>,

    /// Device identity registered with the hub
    #[arg(env = "PNPLINK_DEVICE_ID", long = "device-id", value_name = "id")]
    pub device_id: Option<DeviceId>,

    /// IoT hub MQTT port
    #[arg(
        env = "PNPLINK_PORT",
        long = "port",
        value_name = "port",
        default_value_t = 8883
    )]
    pub port: u16,

    /// Plug and Play model the device implements, eg. "dtmi:com:example:Thermostat;1"
    #[arg(env = "PNPLINK_MODEL_ID", long = "model-id", value_name = "dtmi")]
    pub model_id: Option<String>,

    /// PEM encoded root CA, relative paths are resolved against the storage dir
    #[arg(
        env = "PNPLINK_ROOT_CA",
        long = "root-ca",
        value_name = "path",
        default_value = "ca.pem"
    )]
    pub root_ca: PathBuf,

    /// PEM encoded device certificate
    #[arg(
        env = "PNPLINK_CLIENT_CERT",
        long = "client-cert",
        value_name = "path",
        default_value = "cert.pem"
    )]
    pub client_cert: PathBuf,

    /// PEM encoded device private key
    #[arg(
        env = "PNPLINK_PRIVATE_KEY",
        long = "private-key",
        value_name = "path",
        default_value = "cert_key.key"
    )]
    pub private_key: PathBuf,

    /// Comma separated ALPN protocols to offer during the TLS handshake
    #[arg(
        env = "PNPLINK_ALPN",
        long = "alpn",
        value_name = "protocols",
        value_delimiter = ','
    )]
    pub alpn: Vec<String>,

    /// Do not send the server name during the TLS handshake
    #[arg(env = "PNPLINK_DISABLE_SNI", long = "disable-sni")]
    pub disable_sni: bool,

    /// Base delay between connection attempts in milliseconds
    #[arg(
        env = "PNPLINK_RETRY_BASE_MS",
        long = "retry-base-ms",
        value_name = "ms",
        value_parser = parse_duration
    )]
    pub retry_base: Option<Duration>,

    /// Maximum delay between connection attempts in milliseconds
    #[arg(
        env = "PNPLINK_RETRY_MAX_MS",
        long = "retry-max-ms",
        value_name = "ms",
        value_parser = parse_duration
    )]
    pub retry_max: Option<Duration>,

    /// Connection attempts before giving up on a cycle
    #[arg(
        env = "PNPLINK_RETRY_MAX_ATTEMPTS",
        long = "retry-max-attempts",
        value_name = "int"
    )]
    pub retry_max_attempts: Option<NonZeroU32>,

    /// Time to wait for the hub to accept a connection in milliseconds
    #[arg(
        env = "PNPLINK_CONNACK_TIMEOUT_MS",
        long = "connack-timeout-ms",
        value_name = "ms",
        value_parser = parse_duration
    )]
    pub connack_timeout: Option<Duration>,

    /// Time to wait for a subscription to be acknowledged in milliseconds
    #[arg(
        env = "PNPLINK_SUBSCRIBE_TIMEOUT_MS",
        long = "subscribe-timeout-ms",
        value_name = "ms",
        value_parser = parse_duration
    )]
    pub subscribe_timeout: Option<Duration>,

    /// Delay between two telemetry messages in milliseconds
    #[arg(
        env = "PNPLINK_PUBLISH_INTERVAL_MS",
        long = "publish-interval-ms",
        value_name = "ms",
        value_parser = parse_duration
    )]
    pub publish_interval: Option<Duration>,

    /// Time spent receiving messages on each iteration in milliseconds
    #[arg(
        env = "PNPLINK_PROCESS_LOOP_TIMEOUT_MS",
        long = "process-loop-timeout-ms",
        value_name = "ms",
        value_parser = parse_duration
    )]
    pub process_loop_timeout: Option<Duration>,

    /// Send and receive timeout of the connection in milliseconds
    #[arg(
        env = "PNPLINK_TRANSPORT_TIMEOUT_MS",
        long = "transport-timeout-ms",
        value_name = "ms",
        value_parser = parse_duration
    )]
    pub transport_timeout: Option<Duration>,

    /// Idle delay between connection cycles in milliseconds
    #[arg(
        env = "PNPLINK_CYCLE_DELAY_MS",
        long = "cycle-delay-ms",
        value_name = "ms",
        value_parser = parse_duration
    )]
    pub cycle_delay: Option<Duration>,

    /// Publish iterations before the connection is recycled
    #[arg(
        env = "PNPLINK_POLLS_PER_CYCLE",
        long = "polls-per-cycle",
        value_name = "int"
    )]
    pub polls_per_cycle: Option<u32>,

    /// MQTT keep alive interval in seconds
    #[arg(
        env = "PNPLINK_KEEP_ALIVE_SECS",
        long = "keep-alive-secs",
        value_name = "secs"
    )]
    pub keep_alive_secs: Option<u64>,

    /// Sensor sampling frequency reported to the hub, in Hz
    #[arg(
        env = "PNPLINK_SAMPLING_FREQUENCY",
        long = "sampling-frequency",
        value_name = "hz",
        default_value_t = 1000.0
    )]
    pub sampling_frequency: f64,

    /// Delay between two sensor samples in milliseconds
    #[arg(
        env = "PNPLINK_SAMPLE_INTERVAL_MS",
        long = "sample-interval-ms",
        value_name = "ms",
        value_parser = parse_duration,
        default_value = "1000"
    )]
    pub sample_interval: Duration,
}

impl Cli {
    pub fn model_id(&self) -> ModelId {
        self.model_id.clone().map(ModelId::from).unwrap_or_default()
    }

    /// Apply the timing arguments on top of a base configuration
    pub fn session_config(&self, base: SessionConfig) -> SessionConfig {
        let mut config = base;
        config.retry.base = self.retry_base.unwrap_or(config.retry.base);
        config.retry.max = self.retry_max.unwrap_or(config.retry.max);
        config.retry.max_attempts = self
            .retry_max_attempts
            .unwrap_or(config.retry.max_attempts);
        config.connack_timeout = self.connack_timeout.unwrap_or(config.connack_timeout);
        config.subscribe_timeout = self.subscribe_timeout.unwrap_or(config.subscribe_timeout);
        config.publish_interval = self.publish_interval.unwrap_or(config.publish_interval);
        config.process_loop_timeout = self
            .process_loop_timeout
            .unwrap_or(config.process_loop_timeout);
        config.transport_timeout = self.transport_timeout.unwrap_or(config.transport_timeout);
        config.cycle_delay = self.cycle_delay.unwrap_or(config.cycle_delay);
        config.polls_per_cycle = self.polls_per_cycle.unwrap_or(config.polls_per_cycle);
        config.keep_alive_secs = self.keep_alive_secs.unwrap_or(config.keep_alive_secs);
        config
    }
}

pub fn parse() -> Cli {
    Parser::parse()
}

use std::error::Error;

use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{info, instrument, trace};
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

mod cli;
mod connectivity;
mod credentials;
mod identity;
mod sampler;

use pnplink_remote as remote;
use pnplink_twin as twin;
use pnplink_util as util;

use crate::cli::Cli;
use crate::connectivity::DnsConnectivity;
use crate::identity::DeviceConfig;
use crate::remote::{Credentials, Endpoint, MqttHub, Session, SessionConfig, SessionExit};
use crate::twin::{ReportedProperties, SensorSnapshot};
use crate::util::dirs::config_dir;
use crate::util::store::Store;

const SESSION_CONFIG: &str = "session";

fn initialize_tracing() {
    // Initialize tracing subscriber for human-readable logs
    tracing_subscriber::registry()
        .with(
            // Use some log defaults. These can be overriden using
            // RUST_LOG
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("debug,rumqttc=warn,rustls=warn")),
        )
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_span_events(FmtSpan::CLOSE)
                .event_format(fmt::format().compact().with_target(false).without_time()),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    initialize_tracing();

    let cli = cli::parse();

    // Device documents and TLS material live in the storage dir
    let store = Store::new(cli.storage_dir.clone().unwrap_or_else(config_dir));
    info!("using storage dir {}", store.root().display());

    let device = identity::load(&cli, &store).await?;
    let credentials = credentials::load(&cli, &store).await?;

    // Stored timings are the base for command line overrides
    let stored_config: Option<SessionConfig> = store.read(SESSION_CONFIG).await?;
    let config = cli.session_config(stored_config.unwrap_or_default());

    match start_agent(&cli, device, credentials, config).await {
        Some(SessionExit::RestartRequested) => {
            // leave the actual restart to the service manager
            info!("restarting");
        }
        None => info!("shutting down"),
    }

    Ok(())
}

/// Run the hub session until a restart is requested or the process is
/// interrupted
#[instrument(name = "pnplink", skip_all, fields(device_id = %device.device_id))]
async fn start_agent(
    cli: &Cli,
    device: DeviceConfig,
    credentials: Credentials,
    config: SessionConfig,
) -> Option<SessionExit> {
    trace!(
        host = %device.host,
        port = cli.port,
        model_id = %cli.model_id(),
        config = ?config,
        credentials = ?credentials,
        "using config:"
    );

    // Sensor sampling runs alongside the session and shares the snapshot
    let snapshot = SensorSnapshot::new();
    let sampler = tokio::spawn(sampler::start(snapshot.clone(), cli.sample_interval));

    let endpoint = Endpoint::new(device.host, cli.port);
    let hub = MqttHub::new(device.device_id, cli.model_id(), config.keep_alive());
    let connectivity = DnsConnectivity::new(endpoint.clone());
    let reported = ReportedProperties::default().with_sampling_frequency(cli.sampling_frequency);

    let mut session = Session::new(
        hub,
        connectivity,
        StdRng::from_os_rng(),
        config,
        endpoint,
        credentials,
    )
    .with_snapshot(snapshot)
    .with_reported(reported);

    let exit = tokio::select! {
        exit = session.run() => Some(exit),
        _ = tokio::signal::ctrl_c() => None,
    };

    sampler.abort();
    exit
}

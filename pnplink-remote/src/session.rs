use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

use crate::config::SessionConfig;
use crate::connect::{ConnectError, connect_with_backoff};
use crate::handler::DeviceHandler;
use crate::hub::{HubClient, HubError};
use crate::transport::{Credentials, Endpoint, Timeouts};
use crate::twin::{
    CommandDispatcher, DeviceShadow, PropertyCodec, ReportedProperties, SensorSnapshot, Telemetry,
};

// How long to wait for the sampler to release the sensor snapshot
const SNAPSHOT_WAIT: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    SubscribingCommands,
    SubscribingProperties,
    AwaitingInitialSnapshot,
    SteadyState,
    Disconnecting,
}

/// Why the session stopped for good
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionExit {
    /// A command asked for the device to restart
    RestartRequested,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error(transparent)]
    Hub(#[from] HubError),
}

/// Tells whether the network is usable at all
#[allow(async_fn_in_trait)]
pub trait Connectivity {
    async fn is_connected(&self) -> bool;
}

/// Keeps the device connected to the hub
///
/// Each cycle connects, subscribes to commands then to properties, asks for
/// the full twin and then alternates between publishing and processing
/// inbound messages for a bounded number of iterations before the
/// connection is torn down and a new cycle starts.
pub struct Session<H, C, R> {
    hub: H,
    connectivity: C,
    rng: R,
    config: SessionConfig,
    endpoint: Endpoint,
    credentials: Credentials,
    handler: DeviceHandler,
    reported: ReportedProperties,
    telemetry: Telemetry,
    snapshot: SensorSnapshot,
    state: SessionState,
}

impl<H, C, R> Session<H, C, R>
where
    H: HubClient,
    C: Connectivity,
    R: Rng,
{
    pub fn new(
        hub: H,
        connectivity: C,
        rng: R,
        config: SessionConfig,
        endpoint: Endpoint,
        credentials: Credentials,
    ) -> Self {
        Self {
            hub,
            connectivity,
            rng,
            config,
            endpoint,
            credentials,
            handler: DeviceHandler::new(
                PropertyCodec::default(),
                DeviceShadow::default(),
                CommandDispatcher::new(Utc::now()),
            ),
            reported: ReportedProperties::default(),
            telemetry: Telemetry::default(),
            snapshot: SensorSnapshot::new(),
            state: SessionState::Disconnected,
        }
    }

    pub fn with_reported(self, reported: ReportedProperties) -> Self {
        Self { reported, ..self }
    }

    /// Read telemetry from the given snapshot
    pub fn with_snapshot(self, snapshot: SensorSnapshot) -> Self {
        Self { snapshot, ..self }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn handler(&self) -> &DeviceHandler {
        &self.handler
    }

    /// Run connection cycles until the device needs to restart
    ///
    /// Failed cycles are logged and retried after the cycle delay.
    #[instrument(name = "session", skip_all, fields(endpoint = %self.endpoint))]
    pub async fn run(&mut self) -> SessionExit {
        loop {
            match self.run_cycle().await {
                Ok(Some(exit)) => return exit,
                Ok(None) => {}
                Err(e) => error!("connection cycle failed: {e}"),
            }

            debug!(
                delay_ms = self.config.cycle_delay.as_millis() as u64,
                "waiting for next cycle"
            );
            sleep(self.config.cycle_delay).await;
        }
    }

    /// Run a single connection cycle, from `Disconnected` back to
    /// `Disconnected`
    pub async fn run_cycle(&mut self) -> Result<Option<SessionExit>, SessionError> {
        self.transition(SessionState::Disconnected);
        if !self.connectivity.is_connected().await {
            warn!("network unreachable");
            return Ok(None);
        }

        self.transition(SessionState::Connecting);
        let timeouts = Timeouts {
            connect: self.config.connack_timeout,
            send: self.config.transport_timeout,
            recv: self.config.transport_timeout,
        };
        if let Err(e) = connect_with_backoff(
            &mut self.hub,
            &self.endpoint,
            &self.credentials,
            &timeouts,
            &self.config.retry,
            &mut self.rng,
        )
        .await
        {
            self.transition(SessionState::Disconnected);
            return Err(e.into());
        }
        self.transition(SessionState::Connected);

        let result = self.synchronize().await;

        self.transition(SessionState::Disconnecting);
        self.teardown(result.is_ok()).await;
        self.transition(SessionState::Disconnected);

        Ok(result?)
    }

    async fn synchronize(&mut self) -> Result<Option<SessionExit>, HubError> {
        // subscriptions go first so nothing the hub sends gets lost
        self.transition(SessionState::SubscribingCommands);
        self.hub
            .subscribe_commands(self.config.subscribe_timeout)
            .await?;

        self.transition(SessionState::SubscribingProperties);
        self.hub
            .subscribe_properties(self.config.subscribe_timeout)
            .await?;

        self.transition(SessionState::AwaitingInitialSnapshot);
        self.hub.request_properties().await?;

        // the snapshot is handled like any other update
        self.transition(SessionState::SteadyState);
        for _ in 0..self.config.polls_per_cycle {
            if !self.connectivity.is_connected().await {
                warn!("network lost");
                break;
            }

            self.publish_telemetry().await?;
            self.publish_reported().await?;
            self.hub
                .process_loop(&mut self.handler, self.config.process_loop_timeout)
                .await?;

            if self.handler.restart_requested() {
                info!("restart requested, leaving session");
                return Ok(Some(SessionExit::RestartRequested));
            }

            sleep(self.config.publish_interval).await;
        }

        Ok(None)
    }

    async fn publish_telemetry(&mut self) -> Result<(), HubError> {
        let payload = match self.snapshot.read(SNAPSHOT_WAIT).await {
            Ok(bins) if !bins.is_empty() => self.telemetry.spectrum(&bins),
            Ok(_) => self.telemetry.temperature(self.handler.shadow()),
            Err(e) => {
                warn!("skipping telemetry: {e}");
                return Ok(());
            }
        };

        match payload {
            Ok(payload) => self.hub.send_telemetry(&payload).await,
            Err(e) => {
                warn!("skipping telemetry: {e}");
                Ok(())
            }
        }
    }

    async fn publish_reported(&mut self) -> Result<(), HubError> {
        match self.reported.heartbeat() {
            Ok(payload) => self.hub.send_reported_properties(&payload).await?,
            Err(e) => warn!("skipping reported properties: {e}"),
        }

        if self.handler.take_max_raised() {
            match self.reported.max_temperature(self.handler.shadow()) {
                Ok(payload) => self.hub.send_reported_properties(&payload).await?,
                Err(e) => warn!("skipping maximum temperature report: {e}"),
            }
        }
        Ok(())
    }

    // Unsubscribing and disconnecting only makes sense on a healthy
    // connection, the transport is closed either way
    async fn teardown(&mut self, healthy: bool) {
        if healthy && self.connectivity.is_connected().await {
            if let Err(e) = self.hub.unsubscribe_properties().await {
                warn!("failed to unsubscribe from properties: {e}");
            }
            if let Err(e) = self.hub.unsubscribe_commands().await {
                warn!("failed to unsubscribe from commands: {e}");
            }
            if let Err(e) = self.hub.disconnect().await {
                warn!("failed to disconnect: {e}");
            }
        }
        self.hub.close().await;
    }

    fn transition(&mut self, next: SessionState) {
        if self.state != next {
            debug!(from = ?self.state, to = ?next, "session state changed");
            self.state = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::cell::Cell;
    use std::collections::VecDeque;

    use pretty_assertions::assert_eq;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use serde_json::json;

    use crate::config::RetryConfig;
    use crate::hub::MessageHandler;
    use crate::transport::{Transport, TransportError};
    use crate::twin::{CommandRequest, CommandResponse, DeviceTwinMessage, MessageKind};

    enum Inbound {
        Command(&'static str, Vec<u8>),
        Twin(MessageKind, serde_json::Value),
    }

    /// Records every call and hands out one scripted message per poll
    #[derive(Default)]
    struct FakeHub {
        calls: Vec<&'static str>,
        connect_failures: u32,
        fail_on: Option<&'static str>,
        inbound: VecDeque<Inbound>,
        telemetry: Vec<String>,
        reported: Vec<String>,
        responses: Vec<CommandResponse>,
    }

    impl FakeHub {
        fn call(&mut self, name: &'static str) -> Result<(), HubError> {
            self.calls.push(name);
            if self.fail_on == Some(name) {
                return Err(HubError::ConnectionLost("connection reset".to_string()));
            }
            Ok(())
        }
    }

    impl Transport for FakeHub {
        async fn connect(
            &mut self,
            endpoint: &Endpoint,
            _: &Credentials,
            _: &Timeouts,
        ) -> Result<(), TransportError> {
            self.calls.push("connect");
            if self.connect_failures > 0 {
                self.connect_failures -= 1;
                return Err(TransportError::Timeout(endpoint.to_string()));
            }
            Ok(())
        }

        async fn close(&mut self) {
            self.calls.push("close");
        }
    }

    impl HubClient for FakeHub {
        async fn subscribe_commands(&mut self, _: Duration) -> Result<(), HubError> {
            self.call("subscribe_commands")
        }

        async fn subscribe_properties(&mut self, _: Duration) -> Result<(), HubError> {
            self.call("subscribe_properties")
        }

        async fn request_properties(&mut self) -> Result<(), HubError> {
            self.call("request_properties")
        }

        async fn send_telemetry(&mut self, payload: &[u8]) -> Result<(), HubError> {
            self.call("send_telemetry")?;
            self.telemetry
                .push(String::from_utf8_lossy(payload).into_owned());
            Ok(())
        }

        async fn send_reported_properties(&mut self, payload: &[u8]) -> Result<(), HubError> {
            self.call("send_reported_properties")?;
            self.reported
                .push(String::from_utf8_lossy(payload).into_owned());
            Ok(())
        }

        async fn process_loop<M: MessageHandler>(
            &mut self,
            handler: &mut M,
            _: Duration,
        ) -> Result<(), HubError> {
            self.call("process_loop")?;
            match self.inbound.pop_front() {
                Some(Inbound::Command(name, payload)) => {
                    let response = handler.handle_command(&CommandRequest {
                        name,
                        payload: &payload,
                    });
                    self.responses.push(response);
                }
                Some(Inbound::Twin(kind, doc)) => {
                    let payload = serde_json::to_vec(&doc).unwrap();
                    if let Some(ack) =
                        handler.handle_properties(&DeviceTwinMessage { kind, payload: &payload })
                    {
                        self.reported.push(String::from_utf8(ack).unwrap());
                    }
                }
                None => {}
            }
            Ok(())
        }

        async fn unsubscribe_properties(&mut self) -> Result<(), HubError> {
            self.call("unsubscribe_properties")
        }

        async fn unsubscribe_commands(&mut self) -> Result<(), HubError> {
            self.call("unsubscribe_commands")
        }

        async fn disconnect(&mut self) -> Result<(), HubError> {
            self.call("disconnect")
        }
    }

    /// Reports the network as reachable for the given number of checks
    struct FakeConnectivity {
        checks: Cell<u32>,
    }

    impl FakeConnectivity {
        fn up() -> Self {
            Self {
                checks: Cell::new(u32::MAX),
            }
        }

        fn down() -> Self {
            Self {
                checks: Cell::new(0),
            }
        }
    }

    impl Connectivity for FakeConnectivity {
        async fn is_connected(&self) -> bool {
            let checks = self.checks.get();
            if checks == 0 {
                return false;
            }
            self.checks.set(checks - 1);
            true
        }
    }

    fn session(
        hub: FakeHub,
        connectivity: FakeConnectivity,
        polls_per_cycle: u32,
    ) -> Session<FakeHub, FakeConnectivity, StdRng> {
        let config = SessionConfig {
            retry: RetryConfig {
                max_attempts: std::num::NonZeroU32::new(3).unwrap(),
                ..Default::default()
            },
            polls_per_cycle,
            ..Default::default()
        };
        let credentials = Credentials {
            root_ca: b"ca".to_vec(),
            client_cert: None,
            private_key: None,
            alpn: Vec::new(),
            disable_sni: false,
        };

        Session::new(
            hub,
            connectivity,
            StdRng::seed_from_u64(0),
            config,
            Endpoint::new("my-hub.azure-devices.net", 8883),
            credentials,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_a_cycle_in_order() {
        let mut session = session(FakeHub::default(), FakeConnectivity::up(), 2);

        let exit = session.run_cycle().await.unwrap();

        assert_eq!(exit, None);
        assert_eq!(session.state(), SessionState::Disconnected);
        assert_eq!(
            session.hub.calls,
            vec![
                "connect",
                "subscribe_commands",
                "subscribe_properties",
                "request_properties",
                "send_telemetry",
                "send_reported_properties",
                "process_loop",
                "send_telemetry",
                "send_reported_properties",
                "process_loop",
                "unsubscribe_properties",
                "unsubscribe_commands",
                "disconnect",
                "close",
            ]
        );
        assert_eq!(
            session.hub.reported,
            vec![
                r#"{"samplingFrequency":1000.00}"#,
                r#"{"samplingFrequency":1000.00}"#
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_applies_and_acknowledges_property_updates() {
        let hub = FakeHub {
            inbound: VecDeque::from([
                Inbound::Twin(
                    MessageKind::RequestedSnapshot,
                    json!({
                        "desired": { "targetTemperature": 21.5, "$version": 3 },
                        "reported": { "$version": 1 }
                    }),
                ),
                Inbound::Twin(
                    MessageKind::WritablePropertyUpdate,
                    json!({ "targetTemperature": 25, "$version": 4 }),
                ),
            ]),
            ..Default::default()
        };
        let mut session = session(hub, FakeConnectivity::up(), 3);

        session.run_cycle().await.unwrap();

        assert_eq!(
            session.hub.reported,
            vec![
                r#"{"samplingFrequency":1000.00}"#,
                r#"{"targetTemperature":{"ac":200,"av":3,"ad":"success","value":21.50}}"#,
                r#"{"samplingFrequency":1000.00}"#,
                r#"{"targetTemperature":{"ac":200,"av":4,"ad":"success","value":25.00}}"#,
                r#"{"samplingFrequency":1000.00}"#,
                r#"{"maxTempSinceLastReboot":25.00}"#,
            ]
        );
        assert_eq!(
            session.hub.telemetry,
            vec![
                r#"{"temperature":22.00}"#,
                r#"{"temperature":21.50}"#,
                r#"{"temperature":25.00}"#,
            ]
        );

        let shadow = session.handler().shadow();
        assert_eq!(shadow.maximum(), 25.0);
        assert_eq!(shadow.minimum(), 21.5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drops_malformed_documents_and_carries_on() {
        let hub = FakeHub {
            inbound: VecDeque::from([
                Inbound::Twin(
                    MessageKind::WritablePropertyUpdate,
                    json!({ "targetTemperature": 30.0 }),
                ),
                Inbound::Twin(
                    MessageKind::WritablePropertyUpdate,
                    json!({ "targetTemperature": 23.0, "$version": 6 }),
                ),
            ]),
            ..Default::default()
        };
        let mut session = session(hub, FakeConnectivity::up(), 2);

        session.run_cycle().await.unwrap();

        assert_eq!(
            session.hub.reported,
            vec![
                r#"{"samplingFrequency":1000.00}"#,
                r#"{"samplingFrequency":1000.00}"#,
                r#"{"targetTemperature":{"ac":200,"av":6,"ad":"success","value":23.00}}"#,
            ]
        );
        assert_eq!(session.handler().shadow().maximum(), 23.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sends_the_sensor_spectrum_when_available() {
        let snapshot = SensorSnapshot::new();
        snapshot
            .publish(vec![0.5, 1.25], Duration::from_millis(10))
            .await
            .unwrap();
        let mut session =
            session(FakeHub::default(), FakeConnectivity::up(), 1).with_snapshot(snapshot);

        session.run_cycle().await.unwrap();

        assert_eq!(session.hub.telemetry, vec![r#"{"FFT":[0.5,1.25]}"#]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stops_when_a_restart_is_requested() {
        let hub = FakeHub {
            inbound: VecDeque::from([Inbound::Command("reboot", Vec::new())]),
            ..Default::default()
        };
        let mut session = session(hub, FakeConnectivity::up(), 30);

        let exit = session.run().await;

        assert_eq!(exit, SessionExit::RestartRequested);
        assert_eq!(session.hub.responses, vec![CommandResponse::new(0, Vec::new())]);
        assert_eq!(
            session.hub.calls[session.hub.calls.len() - 4..],
            ["unsubscribe_properties", "unsubscribe_commands", "disconnect", "close"]
        );
        assert_eq!(
            session
                .hub
                .calls
                .iter()
                .filter(|c| **c == "process_loop")
                .count(),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_the_cycle_when_connecting_is_exhausted() {
        let hub = FakeHub {
            connect_failures: u32::MAX,
            ..Default::default()
        };
        let mut session = session(hub, FakeConnectivity::up(), 30);

        let result = session.run_cycle().await;

        assert!(matches!(
            result,
            Err(SessionError::Connect(ConnectError::Exhausted { attempts: 3, .. }))
        ));
        assert_eq!(session.hub.calls, vec!["connect", "connect", "connect"]);
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_starts_a_new_cycle_after_a_failed_one() {
        let hub = FakeHub {
            connect_failures: 3,
            inbound: VecDeque::from([Inbound::Command("reboot", Vec::new())]),
            ..Default::default()
        };
        let mut session = session(hub, FakeConnectivity::up(), 30);

        let exit = session.run().await;

        assert_eq!(exit, SessionExit::RestartRequested);
        assert_eq!(
            session.hub.calls[..5],
            ["connect", "connect", "connect", "connect", "subscribe_commands"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_closes_the_transport_after_a_hub_error() {
        let hub = FakeHub {
            fail_on: Some("subscribe_properties"),
            ..Default::default()
        };
        let mut session = session(hub, FakeConnectivity::up(), 30);

        let result = session.run_cycle().await;

        assert!(matches!(
            result,
            Err(SessionError::Hub(HubError::ConnectionLost(_)))
        ));
        assert_eq!(
            session.hub.calls,
            vec![
                "connect",
                "subscribe_commands",
                "subscribe_properties",
                "close"
            ]
        );
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stays_disconnected_without_network() {
        let mut session = session(FakeHub::default(), FakeConnectivity::down(), 30);

        let exit = session.run_cycle().await.unwrap();

        assert_eq!(exit, None);
        assert!(session.hub.calls.is_empty());
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_leaves_steady_state_when_the_network_drops() {
        // one check before connecting, two steady state iterations
        let connectivity = FakeConnectivity {
            checks: Cell::new(3),
        };
        let mut session = session(FakeHub::default(), connectivity, 30);

        session.run_cycle().await.unwrap();

        let polls = session
            .hub
            .calls
            .iter()
            .filter(|c| **c == "process_loop")
            .count();
        assert_eq!(polls, 2);
        // no graceful teardown on a dead network
        assert_eq!(session.hub.calls.last(), Some(&"close"));
        assert!(!session.hub.calls.contains(&"disconnect"));
    }
}

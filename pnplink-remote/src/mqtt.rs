use std::collections::VecDeque;
use std::time::Duration;

use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Outgoing,
    Packet, Publish, QoS, SubscribeReasonCode, TlsConfiguration, Transport as MqttTransport,
};
use tokio::time::{Instant, timeout, timeout_at};
use tracing::{debug, error, instrument, trace, warn};

use crate::hub::{HubClient, HubError, MessageHandler};
use crate::topic::{self, Route};
use crate::transport::{Credentials, Endpoint, Timeouts, Transport, TransportError};
use crate::twin::{CommandRequest, DeviceTwinMessage, MessageKind};
use crate::util::types::{DeviceId, ModelId};

// Room for requests queued between two polls of the event loop
const REQUEST_CAPACITY: usize = 16;

// Publishes kept while waiting for an acknowledgement
const BACKLOG_CAPACITY: usize = 64;

/// Hub client speaking MQTT over TLS
pub struct MqttHub {
    device_id: DeviceId,
    model_id: ModelId,
    keep_alive: Duration,
    connection: Option<Connection>,
}

impl MqttHub {
    pub fn new(device_id: DeviceId, model_id: ModelId, keep_alive: Duration) -> Self {
        Self {
            device_id,
            model_id,
            keep_alive,
            connection: None,
        }
    }

    fn options(&self, endpoint: &Endpoint, credentials: &Credentials) -> Result<MqttOptions, TransportError> {
        let client_auth = match (&credentials.client_cert, &credentials.private_key) {
            (Some(cert), Some(key)) => Some((cert.clone(), key.clone())),
            (None, None) => None,
            _ => {
                return Err(TransportError::Credentials(
                    "client certificate and private key must be given together".to_string(),
                ));
            }
        };
        if credentials.disable_sni {
            warn!("SNI cannot be disabled for this transport, ignoring");
        }

        let tls = TlsConfiguration::Simple {
            ca: credentials.root_ca.clone(),
            alpn: (!credentials.alpn.is_empty())
                .then(|| credentials.alpn.iter().map(|p| p.as_bytes().to_vec()).collect()),
            client_auth,
        };

        let mut options = MqttOptions::new(self.device_id.to_string(), endpoint.host.clone(), endpoint.port);
        options
            .set_keep_alive(self.keep_alive)
            .set_clean_session(true)
            .set_credentials(
                topic::username(&endpoint.host, &self.device_id, &self.model_id),
                "",
            )
            .set_transport(MqttTransport::tls_with_config(tls));
        Ok(options)
    }

    fn connection(&mut self) -> Result<&mut Connection, HubError> {
        self.connection.as_mut().ok_or(HubError::NotConnected)
    }
}

struct Connection {
    client: AsyncClient,
    eventloop: EventLoop,
    device_id: DeviceId,
    timeouts: Timeouts,

    // publishes received while waiting for an acknowledgement
    backlog: VecDeque<Publish>,

    next_rid: u32,
    pending_get: Option<u32>,
}

impl Connection {
    fn new(client: AsyncClient, eventloop: EventLoop, device_id: DeviceId, timeouts: Timeouts) -> Self {
        Self {
            client,
            eventloop,
            device_id,
            timeouts,
            backlog: VecDeque::new(),
            next_rid: 0,
            pending_get: None,
        }
    }

    fn rid(&mut self) -> u32 {
        self.next_rid = self.next_rid.wrapping_add(1);
        self.next_rid
    }

    async fn wait_connack(&mut self) -> Result<(), TransportError> {
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    if ack.code == ConnectReturnCode::Success {
                        return Ok(());
                    }
                    return Err(TransportError::Refused(format!("{:?}", ack.code)));
                }
                Ok(_) => {}
                Err(ConnectionError::ConnectionRefused(code)) => {
                    return Err(TransportError::Refused(format!("{code:?}")));
                }
                Err(ConnectionError::Tls(e)) => return Err(TransportError::Credentials(e.to_string())),
                Err(e) => return Err(TransportError::Network(e.to_string())),
            }
        }
    }

    // Poll the event loop until `done` accepts a packet
    async fn wait_for<F>(
        &mut self,
        operation: &'static str,
        wait: Duration,
        done: F,
    ) -> Result<Packet, HubError>
    where
        F: Fn(&Packet) -> bool,
    {
        let deadline = Instant::now() + wait;
        loop {
            match timeout_at(deadline, self.eventloop.poll()).await {
                Err(_) => {
                    return Err(HubError::Timeout {
                        operation,
                        timeout: wait,
                    });
                }
                Ok(Err(e)) => return Err(HubError::ConnectionLost(e.to_string())),
                Ok(Ok(Event::Incoming(Packet::Publish(publish)))) => self.buffer(publish),
                Ok(Ok(Event::Incoming(packet))) if done(&packet) => return Ok(packet),
                Ok(Ok(_)) => {}
            }
        }
    }

    // Keep a publish for the next process loop
    fn buffer(&mut self, publish: Publish) {
        if self.backlog.len() >= BACKLOG_CAPACITY {
            warn!(topic = %publish.topic, "backlog full, dropping message");
            return;
        }
        self.backlog.push_back(publish);
    }

    fn drain_backlog<H: MessageHandler>(&mut self, handler: &mut H) {
        while let Some(publish) = self.backlog.pop_front() {
            self.dispatch(publish, handler);
        }
    }

    async fn subscribe(&mut self, filter: &str, wait: Duration) -> Result<(), HubError> {
        let operation = "subscribe";
        self.client
            .subscribe(filter, QoS::AtLeastOnce)
            .await
            .map_err(|e| request_failed(operation, e))?;

        let packet = self
            .wait_for(operation, wait, |p| matches!(p, Packet::SubAck(_)))
            .await?;
        if let Packet::SubAck(ack) = packet {
            if ack
                .return_codes
                .iter()
                .any(|code| matches!(code, SubscribeReasonCode::Failure))
            {
                return Err(HubError::Request {
                    operation,
                    reason: format!("subscription to {filter} rejected"),
                });
            }
        }
        debug!(filter, "subscribed");
        Ok(())
    }

    async fn unsubscribe(&mut self, filter: &str) -> Result<(), HubError> {
        let operation = "unsubscribe";
        self.client
            .unsubscribe(filter)
            .await
            .map_err(|e| request_failed(operation, e))?;
        self.wait_for(operation, self.timeouts.recv, |p| {
            matches!(p, Packet::UnsubAck(_))
        })
        .await?;
        debug!(filter, "unsubscribed");
        Ok(())
    }

    fn publish(
        &mut self,
        operation: &'static str,
        topic: String,
        qos: QoS,
        payload: Vec<u8>,
    ) -> Result<(), HubError> {
        trace!(topic = %topic, bytes = payload.len(), "publishing");
        self.client
            .try_publish(topic, qos, false, payload)
            .map_err(|e| request_failed(operation, e))
    }

    fn report(&mut self, payload: Vec<u8>) -> Result<(), HubError> {
        let rid = self.rid();
        self.publish(
            "send reported properties",
            topic::twin_reported(rid),
            QoS::AtMostOnce,
            payload,
        )
    }

    fn dispatch<H: MessageHandler>(&mut self, publish: Publish, handler: &mut H) {
        match topic::route(&publish.topic, self.pending_get) {
            Route::Command { name, rid } => {
                debug!(command = name, "command received");
                let response = handler.handle_command(&CommandRequest {
                    name,
                    payload: &publish.payload,
                });
                // best effort, the hub times the command out on its side
                if let Err(e) = self.publish(
                    "send command response",
                    topic::command_response(response.status, rid),
                    QoS::AtMostOnce,
                    response.payload,
                ) {
                    error!("{e}");
                }
            }
            Route::Twin(kind) => {
                if kind == MessageKind::RequestedSnapshot {
                    self.pending_get = None;
                }
                let message = DeviceTwinMessage {
                    kind,
                    payload: &publish.payload,
                };
                if let Some(ack) = handler.handle_properties(&message) {
                    if let Err(e) = self.report(ack) {
                        error!("{e}");
                    }
                }
            }
            Route::Rejected { status } => {
                warn!(status, topic = %publish.topic, "twin request rejected by the hub")
            }
            Route::Ignored => debug!(topic = %publish.topic, "ignoring message"),
        }
    }
}

fn request_failed(operation: &'static str, err: rumqttc::ClientError) -> HubError {
    HubError::Request {
        operation,
        reason: err.to_string(),
    }
}

impl Transport for MqttHub {
    #[instrument(skip_all, fields(endpoint = %endpoint), err)]
    async fn connect(
        &mut self,
        endpoint: &Endpoint,
        credentials: &Credentials,
        timeouts: &Timeouts,
    ) -> Result<(), TransportError> {
        // a previous connection would keep reconnecting in the background
        self.close().await;

        let options = self.options(endpoint, credentials)?;
        let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let mut connection = Connection::new(client, eventloop, self.device_id.clone(), *timeouts);

        timeout(timeouts.connect, connection.wait_connack())
            .await
            .map_err(|_| TransportError::Timeout(endpoint.to_string()))??;

        self.connection = Some(connection);
        Ok(())
    }

    async fn close(&mut self) {
        if self.connection.take().is_some() {
            debug!("connection closed");
        }
    }
}

impl HubClient for MqttHub {
    async fn subscribe_commands(&mut self, wait: Duration) -> Result<(), HubError> {
        self.connection()?
            .subscribe(topic::COMMANDS_FILTER, wait)
            .await
    }

    async fn subscribe_properties(&mut self, wait: Duration) -> Result<(), HubError> {
        let connection = self.connection()?;
        connection
            .subscribe(topic::TWIN_RESPONSE_FILTER, wait)
            .await?;
        connection
            .subscribe(topic::TWIN_DESIRED_FILTER, wait)
            .await
    }

    async fn request_properties(&mut self) -> Result<(), HubError> {
        let connection = self.connection()?;
        let rid = connection.rid();
        connection.pending_get = Some(rid);
        connection.publish(
            "request properties",
            topic::twin_get(rid),
            QoS::AtMostOnce,
            Vec::new(),
        )
    }

    async fn send_telemetry(&mut self, payload: &[u8]) -> Result<(), HubError> {
        let connection = self.connection()?;
        let topic = topic::telemetry(&connection.device_id);
        connection.publish("send telemetry", topic, QoS::AtLeastOnce, payload.to_vec())
    }

    async fn send_reported_properties(&mut self, payload: &[u8]) -> Result<(), HubError> {
        self.connection()?.report(payload.to_vec())
    }

    async fn process_loop<H: MessageHandler>(
        &mut self,
        handler: &mut H,
        wait: Duration,
    ) -> Result<(), HubError> {
        let connection = self.connection()?;
        connection.drain_backlog(handler);

        let deadline = Instant::now() + wait;
        loop {
            match timeout_at(deadline, connection.eventloop.poll()).await {
                Err(_) => return Ok(()),
                Ok(Err(e)) => return Err(HubError::ConnectionLost(e.to_string())),
                Ok(Ok(Event::Incoming(Packet::Publish(publish)))) => {
                    connection.dispatch(publish, handler)
                }
                Ok(Ok(event)) => trace!(?event, "event"),
            }
        }
    }

    async fn unsubscribe_properties(&mut self) -> Result<(), HubError> {
        let connection = self.connection()?;
        connection.unsubscribe(topic::TWIN_DESIRED_FILTER).await?;
        connection.unsubscribe(topic::TWIN_RESPONSE_FILTER).await
    }

    async fn unsubscribe_commands(&mut self) -> Result<(), HubError> {
        self.connection()?
            .unsubscribe(topic::COMMANDS_FILTER)
            .await
    }

    async fn disconnect(&mut self) -> Result<(), HubError> {
        let connection = self.connection()?;
        connection
            .client
            .try_disconnect()
            .map_err(|e| request_failed("disconnect", e))?;

        // flush the disconnect packet
        let deadline = Instant::now() + connection.timeouts.send;
        loop {
            match timeout_at(deadline, connection.eventloop.poll()).await {
                Err(_) => {
                    return Err(HubError::Timeout {
                        operation: "disconnect",
                        timeout: connection.timeouts.send,
                    });
                }
                Ok(Ok(Event::Outgoing(Outgoing::Disconnect))) => return Ok(()),
                Ok(Ok(_)) => {}
                Ok(Err(e)) => return Err(HubError::ConnectionLost(e.to_string())),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;
    use rumqttc::Request;

    use crate::twin::CommandResponse;

    #[derive(Default)]
    struct RecordingHandler {
        commands: Vec<(String, Vec<u8>)>,
        documents: Vec<(MessageKind, Vec<u8>)>,
        ack: Option<Vec<u8>>,
    }

    impl MessageHandler for RecordingHandler {
        fn handle_command(&mut self, request: &CommandRequest<'_>) -> CommandResponse {
            self.commands
                .push((request.name.to_string(), request.payload.to_vec()));
            CommandResponse::new(200, b"{}".to_vec())
        }

        fn handle_properties(&mut self, message: &DeviceTwinMessage<'_>) -> Option<Vec<u8>> {
            self.documents.push((message.kind, message.payload.to_vec()));
            self.ack.clone()
        }
    }

    fn device_id() -> DeviceId {
        "sv_002".parse().unwrap()
    }

    // The event loop is never polled, outbound requests end up in the
    // returned channel
    fn connection() -> (Connection, flume::Receiver<Request>) {
        let options = MqttOptions::new("sv_002", "my-hub.azure-devices.net", 8883);
        let (_, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
        let (tx, rx) = flume::bounded(REQUEST_CAPACITY);
        let timeouts = Timeouts {
            connect: Duration::from_secs(10),
            send: Duration::from_secs(2),
            recv: Duration::from_secs(2),
        };
        let connection = Connection::new(AsyncClient::from_senders(tx), eventloop, device_id(), timeouts);
        (connection, rx)
    }

    fn sent(rx: &flume::Receiver<Request>) -> Vec<(String, Vec<u8>)> {
        rx.try_iter()
            .filter_map(|request| match request {
                Request::Publish(publish) => Some((publish.topic, publish.payload.to_vec())),
                _ => None,
            })
            .collect()
    }

    fn publish(topic: &str, payload: &[u8]) -> Publish {
        Publish::new(topic, QoS::AtMostOnce, payload.to_vec())
    }

    #[tokio::test]
    async fn test_answers_commands_on_the_response_topic() {
        let (mut connection, rx) = connection();
        let mut handler = RecordingHandler::default();

        connection.dispatch(
            publish("$iothub/methods/POST/getMaxMinReport/?$rid=7", b"\"2025-01-10T10:00:00Z\""),
            &mut handler,
        );

        assert_eq!(
            handler.commands,
            vec![(
                "getMaxMinReport".to_string(),
                b"\"2025-01-10T10:00:00Z\"".to_vec()
            )]
        );
        assert_eq!(
            sent(&rx),
            vec![("$iothub/methods/res/200/?$rid=7".to_string(), b"{}".to_vec())]
        );
    }

    #[tokio::test]
    async fn test_routes_the_snapshot_and_reports_the_ack() {
        let (connection, rx) = connection();
        let mut hub = MqttHub::new(device_id(), ModelId::default(), Duration::from_secs(60));
        hub.connection = Some(connection);
        let mut handler = RecordingHandler {
            ack: Some(b"ack".to_vec()),
            ..Default::default()
        };

        hub.request_properties().await.unwrap();
        let connection = hub.connection().unwrap();
        assert_eq!(connection.pending_get, Some(1));

        // responses to other requests are not the snapshot
        connection.dispatch(publish("$iothub/twin/res/200/?$rid=9", b"{}"), &mut handler);
        assert!(handler.documents.is_empty());

        connection.dispatch(
            publish("$iothub/twin/res/200/?$rid=1", br#"{"desired":{"$version":1}}"#),
            &mut handler,
        );

        assert_eq!(connection.pending_get, None);
        assert_eq!(
            handler.documents,
            vec![(
                MessageKind::RequestedSnapshot,
                br#"{"desired":{"$version":1}}"#.to_vec()
            )]
        );
        assert_eq!(
            sent(&rx),
            vec![
                ("$iothub/twin/GET/?$rid=1".to_string(), Vec::new()),
                (
                    "$iothub/twin/PATCH/properties/reported/?$rid=2".to_string(),
                    b"ack".to_vec()
                ),
            ]
        );
    }

    #[tokio::test]
    async fn test_sends_nothing_without_an_ack() {
        let (mut connection, rx) = connection();
        let mut handler = RecordingHandler::default();

        connection.dispatch(
            publish(
                "$iothub/twin/PATCH/properties/desired/?$version=4",
                br#"{"unknownProp":1,"$version":4}"#,
            ),
            &mut handler,
        );

        assert_eq!(handler.documents.len(), 1);
        assert_eq!(handler.documents[0].0, MessageKind::WritablePropertyUpdate);
        assert_eq!(sent(&rx), Vec::new());
    }

    #[tokio::test]
    async fn test_ignores_unknown_and_rejected_topics() {
        let (mut connection, rx) = connection();
        let mut handler = RecordingHandler::default();

        connection.dispatch(publish("devices/sv_002/messages/devicebound/", b"hi"), &mut handler);
        connection.dispatch(publish("$iothub/twin/res/404/?$rid=3", b""), &mut handler);

        assert!(handler.commands.is_empty());
        assert!(handler.documents.is_empty());
        assert_eq!(sent(&rx), Vec::new());
    }

    #[tokio::test]
    async fn test_drains_the_backlog_in_arrival_order() {
        let (mut connection, _rx) = connection();
        let mut handler = RecordingHandler::default();

        connection.buffer(publish("$iothub/methods/POST/reboot/?$rid=1", b""));
        connection.buffer(publish("$iothub/twin/PATCH/properties/desired/?$version=2", b"{}"));
        connection.drain_backlog(&mut handler);

        assert_eq!(handler.commands, vec![("reboot".to_string(), Vec::new())]);
        assert_eq!(
            handler.documents,
            vec![(MessageKind::WritablePropertyUpdate, b"{}".to_vec())]
        );
        assert!(connection.backlog.is_empty());
    }

    #[tokio::test]
    async fn test_caps_the_backlog() {
        let (mut connection, _rx) = connection();
        let mut handler = RecordingHandler::default();

        for version in 0..BACKLOG_CAPACITY + 10 {
            connection.buffer(publish(
                &format!("$iothub/twin/PATCH/properties/desired/?$version={version}"),
                b"{}",
            ));
        }
        assert_eq!(connection.backlog.len(), BACKLOG_CAPACITY);

        // the oldest messages are kept
        assert_eq!(
            connection.backlog.front().map(|p| p.topic.as_str()),
            Some("$iothub/twin/PATCH/properties/desired/?$version=0")
        );

        connection.drain_backlog(&mut handler);
        assert_eq!(handler.documents.len(), BACKLOG_CAPACITY);
    }
}

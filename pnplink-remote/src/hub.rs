use std::time::Duration;

use thiserror::Error;

use crate::transport::Transport;
use crate::twin::{CommandRequest, CommandResponse, DeviceTwinMessage};

#[derive(Debug, Error)]
pub enum HubError {
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        operation: &'static str,
        timeout: Duration,
    },

    #[error("{operation} failed: {reason}")]
    Request {
        operation: &'static str,
        reason: String,
    },

    #[error("connection lost: {0}")]
    ConnectionLost(String),

    #[error("not connected")]
    NotConnected,
}

/// Receives the messages the hub pushes to the device
///
/// Handlers are called from within [`HubClient::process_loop`], one message
/// at a time. Whatever they return is sent back to the hub by the client.
pub trait MessageHandler {
    /// Answer a direct method invocation
    fn handle_command(&mut self, request: &CommandRequest<'_>) -> CommandResponse;

    /// Process a twin document, returning the reported properties to send
    /// back if any
    fn handle_properties(&mut self, message: &DeviceTwinMessage<'_>) -> Option<Vec<u8>>;
}

/// Plug and Play operations on top of a hub connection
#[allow(async_fn_in_trait)]
pub trait HubClient: Transport {
    async fn subscribe_commands(&mut self, timeout: Duration) -> Result<(), HubError>;

    async fn subscribe_properties(&mut self, timeout: Duration) -> Result<(), HubError>;

    /// Ask for the full twin document, the answer arrives through
    /// [`MessageHandler::handle_properties`]
    async fn request_properties(&mut self) -> Result<(), HubError>;

    async fn send_telemetry(&mut self, payload: &[u8]) -> Result<(), HubError>;

    async fn send_reported_properties(&mut self, payload: &[u8]) -> Result<(), HubError>;

    /// Receive messages for up to `timeout`, dispatching each to the handler
    async fn process_loop<H: MessageHandler>(
        &mut self,
        handler: &mut H,
        timeout: Duration,
    ) -> Result<(), HubError>;

    async fn unsubscribe_properties(&mut self) -> Result<(), HubError>;

    async fn unsubscribe_commands(&mut self) -> Result<(), HubError>;

    /// Protocol level disconnect, the transport still needs closing
    async fn disconnect(&mut self) -> Result<(), HubError>;
}

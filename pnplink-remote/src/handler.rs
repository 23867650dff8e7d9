use chrono::Utc;
use tracing::{debug, error, info};

use crate::hub::MessageHandler;
use crate::twin::{
    CommandDispatcher, CommandRequest, CommandResponse, DeviceShadow, DeviceTwinMessage,
    MessageKind, PropertyCodec,
};

/// Applies what the hub sends to the device state
///
/// Property documents go through decode, apply and acknowledge in that
/// order. The acknowledgement is encoded before the shadow is touched, so a
/// document that cannot be acknowledged leaves the shadow as it was.
#[derive(Debug)]
pub struct DeviceHandler {
    codec: PropertyCodec,
    shadow: DeviceShadow,
    commands: CommandDispatcher,
    restart_requested: bool,
    max_raised: bool,
}

impl DeviceHandler {
    pub fn new(codec: PropertyCodec, shadow: DeviceShadow, commands: CommandDispatcher) -> Self {
        Self {
            codec,
            shadow,
            commands,
            restart_requested: false,
            max_raised: false,
        }
    }

    pub fn shadow(&self) -> &DeviceShadow {
        &self.shadow
    }

    /// A command asked for the device to restart
    pub fn restart_requested(&self) -> bool {
        self.restart_requested
    }

    /// Whether an update raised the maximum since the last call
    pub fn take_max_raised(&mut self) -> bool {
        std::mem::take(&mut self.max_raised)
    }
}

impl MessageHandler for DeviceHandler {
    fn handle_command(&mut self, request: &CommandRequest<'_>) -> CommandResponse {
        let outcome = self.commands.dispatch(request, &self.shadow, Utc::now());
        if outcome.restart {
            self.restart_requested = true;
        }
        outcome.response
    }

    fn handle_properties(&mut self, message: &DeviceTwinMessage<'_>) -> Option<Vec<u8>> {
        if message.kind == MessageKind::ReportedAck {
            debug!("reported properties accepted");
            return None;
        }

        let update = match self.codec.decode(message) {
            Ok(Some(update)) => update,
            Ok(None) => {
                debug!(kind = ?message.kind, "no {} in document", self.codec.name());
                return None;
            }
            Err(e) => {
                error!(kind = ?message.kind, "dropping twin document: {e}");
                return None;
            }
        };

        let ack = match self.codec.encode_ack(&update) {
            Ok(ack) => ack,
            Err(e) => {
                error!(version = update.version, "dropping twin document: {e}");
                return None;
            }
        };

        info!(
            version = update.version,
            "{} set to {:.2}", update.name, update.value
        );
        if self.shadow.apply(update.value) {
            self.max_raised = true;
        }

        Some(ack)
    }
}

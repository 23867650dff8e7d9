/// Where a device twin document came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// Full twin document, requested by the device after subscribing
    RequestedSnapshot,

    /// Patch of the desired properties pushed by the service
    WritablePropertyUpdate,

    /// Service acknowledgement of a reported properties update
    ReportedAck,
}

/// A device twin document as received from the hub
///
/// The payload is borrowed from the transport buffer and is only valid for
/// the duration of the handler call.
#[derive(Debug, Clone, Copy)]
pub struct DeviceTwinMessage<'a> {
    pub kind: MessageKind,
    pub payload: &'a [u8],
}

/// A decoded writable property update
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyUpdate {
    /// Component the property belongs to, `None` for root properties
    pub component: Option<String>,
    pub name: String,
    pub value: f64,
    pub version: u64,
}

/// A direct method invocation from the service
#[derive(Debug, Clone, Copy)]
pub struct CommandRequest<'a> {
    pub name: &'a str,
    pub payload: &'a [u8],
}

/// The answer to a [`CommandRequest`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResponse {
    pub status: u16,
    pub payload: Vec<u8>,
}

impl CommandResponse {
    pub fn new(status: u16, payload: Vec<u8>) -> Self {
        Self { status, payload }
    }
}

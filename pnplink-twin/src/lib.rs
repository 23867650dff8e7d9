/*
Everything the device knows about its Plug and Play model lives here: the
device twin documents exchanged with the hub, the local shadow of the
tracked temperature, the commands the device answers to and the payloads
it periodically reports.

Nothing in this crate talks to the network. Documents come in as byte
slices and go out as bounded byte buffers, the remote crate moves them.
*/

mod ack;
mod codec;
mod command;
mod json;
mod message;
mod report;
mod shadow;
mod telemetry;

pub use ack::{ACK_CAPACITY, AckPayload, STATUS_SUCCESS};
pub use codec::{CodecError, PropertyCodec, TARGET_TEMPERATURE};
pub use command::{CommandDispatcher, CommandOutcome, MAX_MIN_REPORT, REBOOT};
pub use message::{CommandRequest, CommandResponse, DeviceTwinMessage, MessageKind, PropertyUpdate};
pub use report::{REPORTED_CAPACITY, ReportedProperties};
pub use shadow::{DEFAULT_TEMPERATURE, DeviceShadow};
pub use telemetry::{FFT_BINS, SensorSnapshot, SnapshotBusy, TELEMETRY_CAPACITY, Telemetry};

use std::fmt;

use serde::de::{self as de, DeserializeSeed, Deserializer, IgnoredAny, MapAccess, SeqAccess, Visitor};
use thiserror::Error;
use tracing::{debug, instrument, trace};

use crate::ack::{ACK_CAPACITY, AckPayload};
use crate::message::{DeviceTwinMessage, MessageKind, PropertyUpdate};

/// The writable property advertised by the thermostat model
pub const TARGET_TEMPERATURE: &str = "targetTemperature";

const VERSION_KEY: &str = "$version";
const DESIRED_KEY: &str = "desired";
const COMPONENT_MARKER_KEY: &str = "__t";
const COMPONENT_MARKER: &str = "c";

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("document has no $version field")]
    MissingVersion,

    #[error("malformed document: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("failed to encode payload: {0}")]
    Encoding(#[source] serde_json::Error),

    #[error("payload needs {needed} bytes but the buffer holds {capacity}")]
    BufferTooSmall { needed: usize, capacity: usize },
}

/// Reads updates of a single writable property from device twin documents
/// and builds the matching acknowledgements
#[derive(Debug, Clone)]
pub struct PropertyCodec {
    name: String,
    ack_capacity: usize,
}

impl Default for PropertyCodec {
    fn default() -> Self {
        Self::new(TARGET_TEMPERATURE)
    }
}

impl PropertyCodec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ack_capacity: ACK_CAPACITY,
        }
    }

    pub fn with_ack_capacity(self, ack_capacity: usize) -> Self {
        Self {
            ack_capacity,
            ..self
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ack_capacity(&self) -> usize {
        self.ack_capacity
    }

    /// Find the tracked property in a twin document
    ///
    /// Full snapshots carry the properties (and their version) under the
    /// `desired` section, patches carry them at the top level. Returns
    /// `None` if the document does not mention the property, and always for
    /// reported property acknowledgements since those have no body.
    #[instrument(level = "trace", skip_all, fields(kind = ?message.kind), err)]
    pub fn decode(&self, message: &DeviceTwinMessage<'_>) -> Result<Option<PropertyUpdate>, CodecError> {
        let scan = PropertyScan { name: &self.name };
        let scanned = match message.kind {
            MessageKind::ReportedAck => return Ok(None),
            MessageKind::RequestedSnapshot => read(message.payload, SnapshotScan(scan))?,
            MessageKind::WritablePropertyUpdate => read(message.payload, scan)?,
        };

        let version = scanned.version.ok_or(CodecError::MissingVersion)?;
        Ok(scanned.value.map(|value| PropertyUpdate {
            component: None,
            name: self.name.clone(),
            value,
            version,
        }))
    }

    /// Build the acknowledgement for an accepted update
    pub fn acknowledge(&self, update: &PropertyUpdate) -> AckPayload {
        AckPayload::success(update)
    }

    /// Build and encode the acknowledgement within the configured capacity
    pub fn encode_ack(&self, update: &PropertyUpdate) -> Result<Vec<u8>, CodecError> {
        let mut buf = vec![0; self.ack_capacity];
        let len = self.acknowledge(update).encode_into(&mut buf)?;
        buf.truncate(len);
        Ok(buf)
    }
}

// Run a scan over the whole payload, anything after the document is an error
fn read<'de, S: DeserializeSeed<'de>>(payload: &'de [u8], seed: S) -> Result<S::Value, CodecError> {
    let mut de = serde_json::Deserializer::from_slice(payload);
    let value = seed.deserialize(&mut de).map_err(CodecError::Malformed)?;
    de.end().map_err(CodecError::Malformed)?;
    Ok(value)
}

#[derive(Debug, Default)]
struct Scanned {
    version: Option<u64>,
    value: Option<f64>,
}

/// Walks one level of a properties object looking for the version and the
/// tracked property
#[derive(Clone, Copy)]
struct PropertyScan<'c> {
    name: &'c str,
}

impl<'de> DeserializeSeed<'de> for PropertyScan<'_> {
    type Value = Scanned;

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de> Visitor<'de> for PropertyScan<'_> {
    type Value = Scanned;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a device twin properties object")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let mut scanned = Scanned::default();
        while let Some(key) = map.next_key::<String>()? {
            if key == VERSION_KEY {
                scanned.version = Some(map.next_value()?);
            } else if key.starts_with('$') {
                // metadata such as $metadata
                map.next_value::<IgnoredAny>()?;
            } else if key == self.name {
                scanned.value = Some(map.next_value()?);
            } else {
                match map.next_value_seed(EntryProbe)? {
                    Entry::Component => debug!(component = %key, "skipping unknown component"),
                    Entry::Property => debug!(property = %key, "skipping unknown property"),
                }
            }
        }
        Ok(scanned)
    }
}

/// Looks for the `desired` section of a full twin document
struct SnapshotScan<'c>(PropertyScan<'c>);

impl<'de> DeserializeSeed<'de> for SnapshotScan<'_> {
    type Value = Scanned;

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_map(self)
    }
}

impl<'de> Visitor<'de> for SnapshotScan<'_> {
    type Value = Scanned;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a device twin document")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let mut scanned = Scanned::default();
        while let Some(key) = map.next_key::<String>()? {
            if key == DESIRED_KEY {
                scanned = map.next_value_seed(self.0)?;
            } else {
                trace!(section = %key, "skipping twin section");
                map.next_value::<IgnoredAny>()?;
            }
        }
        Ok(scanned)
    }
}

enum Entry {
    Component,
    Property,
}

/// Consumes an entry value whatever its shape, telling whether it was a
/// component (an object tagged with `"__t": "c"`)
struct EntryProbe;

impl<'de> DeserializeSeed<'de> for EntryProbe {
    type Value = Entry;

    fn deserialize<D: Deserializer<'de>>(self, deserializer: D) -> Result<Self::Value, D::Error> {
        deserializer.deserialize_any(self)
    }
}

impl<'de> Visitor<'de> for EntryProbe {
    type Value = Entry;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("any JSON value")
    }

    fn visit_bool<E: de::Error>(self, _: bool) -> Result<Self::Value, E> {
        Ok(Entry::Property)
    }

    fn visit_i64<E: de::Error>(self, _: i64) -> Result<Self::Value, E> {
        Ok(Entry::Property)
    }

    fn visit_u64<E: de::Error>(self, _: u64) -> Result<Self::Value, E> {
        Ok(Entry::Property)
    }

    fn visit_f64<E: de::Error>(self, _: f64) -> Result<Self::Value, E> {
        Ok(Entry::Property)
    }

    fn visit_str<E: de::Error>(self, _: &str) -> Result<Self::Value, E> {
        Ok(Entry::Property)
    }

    fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(Entry::Property)
    }

    fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
        Ok(Entry::Property)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
        while seq.next_element::<IgnoredAny>()?.is_some() {}
        Ok(Entry::Property)
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
        let mut entry = Entry::Property;
        while let Some(key) = map.next_key::<String>()? {
            if key == COMPONENT_MARKER_KEY {
                let marker: serde_json::Value = map.next_value()?;
                if marker == COMPONENT_MARKER {
                    entry = Entry::Component;
                }
            } else {
                map.next_value::<IgnoredAny>()?;
            }
        }
        Ok(entry)
    }
}

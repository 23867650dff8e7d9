use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::value::RawValue;

use crate::codec::CodecError;
use crate::json::fixed;
use crate::message::PropertyUpdate;

/// Status reported when a writable property update is accepted
pub const STATUS_SUCCESS: u16 = 200;

/// Default room for an encoded acknowledgement
pub const ACK_CAPACITY: usize = 380;

const VALUE_DECIMALS: usize = 2;

/// Acknowledgement of a writable property update, sent back as a reported
/// property
#[derive(Debug, Clone, PartialEq)]
pub struct AckPayload {
    pub name: String,
    pub value: f64,
    pub version: u64,
    pub status: u16,
    pub description: String,
}

#[derive(Serialize)]
struct AckBody<'a> {
    ac: u16,
    av: u64,
    ad: &'a str,
    value: Box<RawValue>,
}

impl AckPayload {
    pub fn success(update: &PropertyUpdate) -> Self {
        Self {
            name: update.name.clone(),
            value: update.value,
            version: update.version,
            status: STATUS_SUCCESS,
            description: "success".to_string(),
        }
    }

    /// Write the acknowledgement document into `buf`, returning the number
    /// of bytes used
    ///
    /// The buffer is left untouched on failure.
    pub fn encode_into(&self, buf: &mut [u8]) -> Result<usize, CodecError> {
        let body = AckBody {
            ac: self.status,
            av: self.version,
            ad: &self.description,
            value: fixed(self.value, VALUE_DECIMALS).map_err(CodecError::Encoding)?,
        };
        let document = BTreeMap::from([(self.name.as_str(), body)]);
        let encoded = serde_json::to_vec(&document).map_err(CodecError::Encoding)?;

        let needed = encoded.len();
        if needed > buf.len() {
            return Err(CodecError::BufferTooSmall {
                needed,
                capacity: buf.len(),
            });
        }
        buf[..needed].copy_from_slice(&encoded);
        Ok(needed)
    }
}

//! The generic `{type, data}` message envelope
//!
//! Every frame on the wire is a JSON object with a string `type`
//! discriminator and an optional `data` payload. Decoding is two-phase:
//! the envelope is parsed first, then `data` is decoded into the shape
//! the handler for that `type` expects.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Generic wrapper for all JSON messages on the control channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    /// Message type discriminator (see [`crate::message::types`])
    #[serde(rename = "type")]
    pub msg_type: String,

    /// Opaque payload; omitted on the wire when the message carries none
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl Envelope {
    /// Create an envelope with a typed payload
    pub fn with_data<T: Serialize>(msg_type: &str, data: &T) -> Result<Self, ProtocolError> {
        Ok(Self {
            msg_type: msg_type.to_string(),
            data: Some(serde_json::to_value(data)?),
        })
    }

    /// Create an envelope with no payload
    pub fn bare(msg_type: &str) -> Self {
        Self {
            msg_type: msg_type.to_string(),
            data: None,
        }
    }

    /// Decode the payload into the shape expected by the handler
    pub fn decode_data<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        let data = self
            .data
            .clone()
            .ok_or_else(|| ProtocolError::MissingData(self.msg_type.clone()))?;
        Ok(serde_json::from_value(data)?)
    }

    /// Serialize the envelope to its wire form
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse an inbound frame into an envelope
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }
}

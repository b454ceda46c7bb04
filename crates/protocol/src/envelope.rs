use serde::{Deserialize, Serialize};

use crate::ProtocolError;
use crate::constants::EventType;

/// Envelope for every text frame on the channel.
///
/// The `data` field uses `serde_json::value::RawValue` to defer
/// deserialization until the receiver knows which payload type to expect.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub event: EventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Box<serde_json::value::RawValue>>,
}

impl Message {
    /// Creates a new message with the given event tag and payload.
    pub fn new<T: Serialize>(event: EventType, data: Option<&T>) -> Result<Self, serde_json::Error> {
        let raw = match data {
            Some(d) => {
                let json = serde_json::to_string(d)?;
                Some(serde_json::value::RawValue::from_string(json)?)
            }
            None => None,
        };
        Ok(Self { event, data: raw })
    }

    /// Creates a message that carries no payload.
    pub fn bare(event: EventType) -> Self {
        Self { event, data: None }
    }

    /// Deserializes the payload into the given type.
    pub fn parse_data<T: for<'de> Deserialize<'de>>(&self) -> Result<Option<T>, serde_json::Error> {
        match &self.data {
            Some(raw) => Ok(Some(serde_json::from_str(raw.get())?)),
            None => Ok(None),
        }
    }

    /// Deserializes a payload that the event requires.
    pub fn require_data<T: for<'de> Deserialize<'de>>(&self) -> Result<T, ProtocolError> {
        self.parse_data()?
            .ok_or_else(|| ProtocolError::MissingData(self.event.clone()))
    }

    /// Serializes the envelope into the text of a frame.
    pub fn to_text(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parses the text of a frame.
    pub fn from_text(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

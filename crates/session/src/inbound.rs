//! Decoding of inbound protocol messages.

use uplink_protocol::envelope::Message;
use uplink_protocol::messages::{
    ChunkAck, ChunkNack, ReadyForBinary, ServerError, SessionInitialized, SessionStatusResponse,
    UploadComplete,
};
use uplink_protocol::{EventType, ProtocolError};

/// Every server message the engine reacts to, with its decoded payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Authenticated,
    SessionInitialized(SessionInitialized),
    ReadyForBinary(ReadyForBinary),
    ChunkAck(ChunkAck),
    ChunkNack(ChunkNack),
    UploadComplete(UploadComplete),
    StatusResponse(SessionStatusResponse),
    Error(ServerError),
    /// Unknown tags and client-direction events. Always ignored.
    Other(EventType),
}

impl Inbound {
    /// Decodes an envelope.
    ///
    /// Events that need a payload fail when it is missing or malformed.
    /// Events with an optional payload fall back to its default.
    pub fn from_message(msg: &Message) -> Result<Self, ProtocolError> {
        let inbound = match msg.event {
            EventType::Authenticated => Self::Authenticated,
            EventType::SessionRecordingInitialized => Self::SessionInitialized(msg.require_data()?),
            EventType::ReadyForBinary => Self::ReadyForBinary(msg.require_data()?),
            EventType::ChunkAck => Self::ChunkAck(msg.require_data()?),
            EventType::ChunkNack => Self::ChunkNack(msg.require_data()?),
            EventType::UploadComplete => {
                Self::UploadComplete(msg.parse_data()?.unwrap_or_default())
            }
            EventType::SessionStatusResponse => {
                Self::StatusResponse(msg.parse_data()?.unwrap_or_default())
            }
            EventType::Error => Self::Error(msg.parse_data()?.unwrap_or_default()),
            ref other => Self::Other(other.clone()),
        };
        Ok(inbound)
    }

    /// Event tag the message arrived with.
    pub fn event(&self) -> EventType {
        match self {
            Self::Authenticated => EventType::Authenticated,
            Self::SessionInitialized(_) => EventType::SessionRecordingInitialized,
            Self::ReadyForBinary(_) => EventType::ReadyForBinary,
            Self::ChunkAck(_) => EventType::ChunkAck,
            Self::ChunkNack(_) => EventType::ChunkNack,
            Self::UploadComplete(_) => EventType::UploadComplete,
            Self::StatusResponse(_) => EventType::SessionStatusResponse,
            Self::Error(_) => EventType::Error,
            Self::Other(event) => event.clone(),
        }
    }
}

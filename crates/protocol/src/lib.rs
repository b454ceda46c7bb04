//! Wire protocol for the segment ingestion channel.
//!
//! Text frames carry a JSON [`Message`] envelope (`{"event": ..., "data": ...}`);
//! binary frames carry raw segment bytes and have no envelope.

pub mod constants;
pub mod envelope;
pub mod messages;
pub mod types;

// Re-export primary types for convenience.
pub use constants::EventType;
pub use envelope::Message;
pub use types::{Credentials, OutputFormat, StreamStatus};

/// Errors produced while encoding or decoding protocol messages.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("event {0:?} arrived without a data payload")]
    MissingData(EventType),
}

//! Transport seam between the session engine and the network.

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use tokio_tungstenite::tungstenite;

use uplink_protocol::envelope::Message;

/// Errors from the transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("WebSocket error: {0}")]
    Ws(#[from] tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("connection closed")]
    Closed,
}

/// Inbound events delivered by a transport, in arrival order.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// A text frame carrying a protocol message.
    Message(Message),
    /// The peer closed the connection (or it was closed locally).
    Closed { code: Option<u16>, reason: String },
    /// The connection failed (read/write error, pong timeout).
    Failed(String),
}

/// Boxed future returned by [`Transport`] methods.
pub type TransportFuture<'a> = Pin<Box<dyn Future<Output = Result<(), TransportError>> + Send + 'a>>;

/// Outbound half of a persistent bidirectional channel.
///
/// The WebSocket client implements this; tests substitute a recorder.
/// Frames are written in call order.
pub trait Transport: Send {
    /// Sends a protocol message as a text frame.
    fn send_text(&mut self, message: &Message) -> TransportFuture<'_>;

    /// Sends raw bytes as a binary frame.
    fn send_binary(&mut self, data: Bytes) -> TransportFuture<'_>;

    /// Closes the connection after queued frames are written.
    fn close(&mut self) -> TransportFuture<'_>;

    /// Returns `true` while frames can still be sent.
    fn is_open(&self) -> bool;
}
